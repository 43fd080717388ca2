// main.rs — 全景导览演示宿主：窗口、输入映射、HUD、场景导航

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // 在 Release 模式下隐藏控制台窗口

mod i18n;
mod renderer;

use panorama_tour::camera::normalize_heading;
use panorama_tour::config::resolve_config_path_from_args;
use panorama_tour::{
    FileResolver, Frame, FrameRenderer, ImageRef, PanoramaViewer, SceneSpec, Tour, ViewerConfig,
    ViewerEvent,
};
use renderer::Renderer;

use winit::{
    dpi::{LogicalSize, PhysicalPosition},
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowBuilder},
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

const MOUSE_POINTER: u64 = 0;

/// HUD 里产生、在帧结束后才执行的操作（绘制时查看器正被借用）。
enum UiAction {
    OpenImage(PathBuf),
    ResetView,
    ToggleFullscreen,
    SetAutoRotate(bool),
    SetSensitivity(f32),
    SetLanguage(String),
    Exit,
}

struct Hud {
    show_fps: bool,
    fps: f32,
    lang: String,
    is_fullscreen: bool,
    auto_rotate: bool,
    sensitivity: f32,
    status: Option<String>,
    actions: Vec<UiAction>,
}

struct HostFrame<'a> {
    renderer: &'a mut Renderer,
    window: &'a Window,
    hud: &'a mut Hud,
}

impl FrameRenderer for HostFrame<'_> {
    type Error = wgpu::SurfaceError;

    fn draw(&mut self, frame: &Frame<'_>) -> Result<(), wgpu::SurfaceError> {
        let HostFrame {
            renderer,
            window,
            hud,
        } = self;
        renderer.render_with_ui(frame, window, |ctx| draw_ui(ctx, frame, hud))
    }
}

/// 第一个非选项参数：导览清单 (.json) 或单张全景图。
fn resolve_input_from_args() -> Option<PathBuf> {
    let mut it = std::env::args().skip(1);
    while let Some(a) = it.next() {
        if a == "--lang" || a == "--config" {
            it.next();
        } else if !a.starts_with("--") {
            return Some(PathBuf::from(a));
        }
    }
    None
}

fn image_scene(path: &Path) -> SceneSpec {
    let mut spec = SceneSpec::from_image(
        path.display().to_string(),
        ImageRef::Uri(path.display().to_string()),
    );
    spec.title = path.file_name().map(|n| n.to_string_lossy().into_owned());
    spec
}

fn open_image(viewer: &mut PanoramaViewer, hud: &mut Hud, path: PathBuf) {
    let path = std::fs::canonicalize(&path).unwrap_or(path);
    log::info!(
        "{}",
        i18n::tr_with("log.opening_scene", &[("scene", path.display().to_string())])
    );
    hud.status = None;
    viewer.open_scene(image_scene(&path));
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // i18n
    let current_lang = i18n::resolve_lang_from_args();
    i18n::init(current_lang.clone());

    let config = match resolve_config_path_from_args() {
        Some(path) => ViewerConfig::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "{}",
                i18n::tr_with(
                    "error.config",
                    &[("path", path.display().to_string()), ("err", e.to_string())]
                )
            );
            ViewerConfig::default()
        }),
        None => ViewerConfig::default(),
    };

    let event_loop = EventLoop::new();
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(i18n::tr("app.title"))
            .with_inner_size(LogicalSize::new(1280, 720))
            .build(&event_loop)
            .unwrap(),
    );

    let mut renderer = pollster::block_on(Renderer::new(window.clone(), &config));

    let mut hud = Hud {
        show_fps: false,
        fps: 0.0,
        lang: current_lang,
        is_fullscreen: false,
        auto_rotate: config.auto_rotate,
        sensitivity: config.drag_sensitivity,
        status: None,
        actions: Vec::new(),
    };

    // 相对路径基于清单所在目录；单张图片用绝对路径
    let mut tour: Option<Tour> = None;
    let root = std::env::current_dir().unwrap_or_default();
    let mut viewer = PanoramaViewer::new(config, Arc::new(FileResolver::new(root)));
    let size = renderer.size;
    viewer.resize(size.width as f32, size.height as f32);

    match resolve_input_from_args() {
        Some(path) if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) => {
            match Tour::load(&path) {
                Ok(t) => {
                    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
                    viewer.set_resolver(Arc::new(FileResolver::new(base)));
                    if let Some(start) = t.start_scene() {
                        log::info!(
                            "{}",
                            i18n::tr_with("log.opening_scene", &[("scene", start.id.to_string())])
                        );
                        viewer.open_scene(start.clone());
                    }
                    tour = Some(t);
                }
                Err(e) => {
                    let msg = i18n::tr_with(
                        "error.tour",
                        &[("path", path.display().to_string()), ("err", e.to_string())],
                    );
                    log::error!("{msg}");
                    hud.status = Some(msg);
                }
            }
        }
        Some(path) => open_image(&mut viewer, &mut hud, path),
        None => {}
    }

    // 交互状态
    let mut mouse_pressed = false;
    let mut cursor = PhysicalPosition::new(0.0f64, 0.0f64);

    // FPS / 帧间隔
    let mut last_frame = Instant::now();
    let mut fps_window_start = Instant::now();
    let mut frame_count = 0;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent { event, .. } => {
                // 先让 egui 处理事件；抬起/取消总是转给查看器，避免手势卡住
                let consumed = renderer
                    .egui_state
                    .on_event(&renderer.egui_ctx, &event)
                    .consumed;

                match event {
                    WindowEvent::CloseRequested => {
                        *control_flow = ControlFlow::Exit;
                    }

                    WindowEvent::Resized(new_size) => {
                        renderer.resize(new_size);
                        viewer.resize(new_size.width as f32, new_size.height as f32);
                    }

                    WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                        renderer.resize(*new_inner_size);
                        viewer.resize(new_inner_size.width as f32, new_inner_size.height as f32);
                    }

                    // 键盘快捷键
                    WindowEvent::KeyboardInput { input, .. }
                        if !consumed && input.state == ElementState::Pressed =>
                    {
                        match input.virtual_keycode {
                            Some(VirtualKeyCode::O) => {
                                if let Some(path) = rfd::FileDialog::new()
                                    .add_filter(
                                        &i18n::tr("file.filter.images"),
                                        &["jpg", "jpeg", "png", "bmp"],
                                    )
                                    .pick_file()
                                {
                                    open_image(&mut viewer, &mut hud, path);
                                }
                            }
                            Some(VirtualKeyCode::R) => viewer.reset_view(),
                            Some(VirtualKeyCode::F11) => hud.actions.push(UiAction::ToggleFullscreen),
                            _ => {}
                        }
                    }

                    // 鼠标：当作编号 0 的指针
                    WindowEvent::MouseInput {
                        state,
                        button: MouseButton::Left,
                        ..
                    } => match state {
                        ElementState::Pressed if !consumed => {
                            mouse_pressed = true;
                            viewer.pointer_down(MOUSE_POINTER, cursor.x as f32, cursor.y as f32);
                        }
                        ElementState::Released if mouse_pressed => {
                            mouse_pressed = false;
                            viewer.pointer_up(MOUSE_POINTER, cursor.x as f32, cursor.y as f32);
                        }
                        _ => {}
                    },

                    WindowEvent::CursorMoved { position, .. } => {
                        cursor = position;
                        if mouse_pressed {
                            viewer.pointer_move(MOUSE_POINTER, position.x as f32, position.y as f32);
                        }
                    }

                    WindowEvent::CursorLeft { .. } if mouse_pressed => {
                        mouse_pressed = false;
                        viewer.pointer_cancel(MOUSE_POINTER);
                    }

                    // 触摸：编号从 1 开始，与鼠标区分
                    WindowEvent::Touch(Touch {
                        phase, location, id, ..
                    }) => {
                        let pointer = id + 1;
                        let (x, y) = (location.x as f32, location.y as f32);
                        match phase {
                            TouchPhase::Started if !consumed => viewer.pointer_down(pointer, x, y),
                            TouchPhase::Started => {}
                            TouchPhase::Moved => viewer.pointer_move(pointer, x, y),
                            TouchPhase::Ended => viewer.pointer_up(pointer, x, y),
                            TouchPhase::Cancelled => viewer.pointer_cancel(pointer),
                        }
                    }

                    WindowEvent::MouseWheel { delta, .. } if !consumed => {
                        let scroll = match delta {
                            MouseScrollDelta::LineDelta(_, y) => y,
                            MouseScrollDelta::PixelDelta(pos) => pos.y as f32,
                        };
                        viewer.wheel(scroll);
                    }

                    WindowEvent::DroppedFile(path) => open_image(&mut viewer, &mut hud, path),

                    _ => {}
                }
            }

            Event::RedrawRequested(_) => {
                let now = Instant::now();
                let dt = now.duration_since(last_frame).as_secs_f32();
                last_frame = now;

                // FPS 统计
                frame_count += 1;
                let elapsed = now.duration_since(fps_window_start).as_secs_f32();
                if elapsed >= 1.0 {
                    hud.fps = frame_count as f32 / elapsed;
                    frame_count = 0;
                    fps_window_start = now;
                }

                let mut host = HostFrame {
                    renderer: &mut renderer,
                    window: &window,
                    hud: &mut hud,
                };
                match viewer.frame(dt, &mut host) {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => renderer.resize(renderer.size),
                    Err(wgpu::SurfaceError::OutOfMemory) => *control_flow = ControlFlow::Exit,
                    Err(e) => log::error!("Render error: {:?}", e),
                }

                for event in viewer.drain_events() {
                    handle_viewer_event(event, &mut viewer, tour.as_ref(), &mut hud);
                }

                for action in std::mem::take(&mut hud.actions) {
                    match action {
                        UiAction::OpenImage(path) => open_image(&mut viewer, &mut hud, path),
                        UiAction::ResetView => viewer.reset_view(),
                        UiAction::ToggleFullscreen => {
                            hud.is_fullscreen = !hud.is_fullscreen;
                            if hud.is_fullscreen {
                                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                            } else {
                                window.set_fullscreen(None);
                            }
                        }
                        UiAction::SetAutoRotate(enabled) => viewer.set_auto_rotate(enabled),
                        UiAction::SetSensitivity(s) => viewer.set_drag_sensitivity(s),
                        UiAction::SetLanguage(lang) => {
                            i18n::init(lang.clone());
                            hud.lang = lang;
                            window.set_title(&i18n::tr("app.title"));
                        }
                        UiAction::Exit => *control_flow = ControlFlow::Exit,
                    }
                }
            }

            Event::MainEventsCleared => {
                window.request_redraw();
            }

            _ => {}
        }
    });
}

/// 宿主负责导航：点中带目标场景的热点就切换过去。
fn handle_viewer_event(
    event: ViewerEvent,
    viewer: &mut PanoramaViewer,
    tour: Option<&Tour>,
    hud: &mut Hud,
) {
    match event {
        ViewerEvent::HotspotSelected(id) => {
            log::info!(
                "{}",
                i18n::tr_with("log.hotspot_selected", &[("hotspot", id.to_string())])
            );
            let target = viewer
                .scene()
                .and_then(|s| s.spec.hotspots.iter().find(|h| h.id == id))
                .and_then(|h| h.target_scene.clone());
            let Some(target) = target else {
                return;
            };
            match tour.and_then(|t| t.scene(&target)) {
                Some(spec) => {
                    hud.status = None;
                    viewer.open_scene(spec.clone());
                }
                None => log::warn!(
                    "{}",
                    i18n::tr_with(
                        "log.hotspot_target_missing",
                        &[("hotspot", id.to_string()), ("scene", target.to_string())]
                    )
                ),
            }
        }
        ViewerEvent::RegionChanged(region) => {
            log::debug!("region changed: {:?}", region);
        }
        ViewerEvent::LoadFailed { scene, error } => {
            let msg = i18n::tr_with(
                "error.load_failed",
                &[("scene", scene.to_string()), ("err", error.to_string())],
            );
            log::warn!("{msg}");
            hud.status = Some(msg);
        }
    }
}

fn draw_ui(ctx: &egui::Context, frame: &Frame<'_>, hud: &mut Hud) {
    egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
        egui::menu::bar(ui, |ui| {
            // File
            ui.menu_button(i18n::tr("menu.file"), |ui| {
                if ui.button(i18n::tr("menu.open_image")).clicked() {
                    ui.close_menu();
                    if let Some(path) = rfd::FileDialog::new()
                        .add_filter(&i18n::tr("file.filter.images"), &["jpg", "jpeg", "png", "bmp"])
                        .pick_file()
                    {
                        hud.actions.push(UiAction::OpenImage(path));
                    }
                }
                if ui.button(i18n::tr("menu.exit")).clicked() {
                    hud.actions.push(UiAction::Exit);
                }
            });

            // View
            ui.menu_button(i18n::tr("menu.view"), |ui| {
                if ui.button(i18n::tr("view.reset")).clicked() {
                    hud.actions.push(UiAction::ResetView);
                    ui.close_menu();
                }

                let fullscreen_label = if hud.is_fullscreen {
                    i18n::tr("view.fullscreen.exit")
                } else {
                    i18n::tr("view.fullscreen.enter")
                };
                if ui.button(fullscreen_label).clicked() {
                    hud.actions.push(UiAction::ToggleFullscreen);
                    ui.close_menu();
                }

                ui.separator();
                if ui
                    .checkbox(&mut hud.auto_rotate, i18n::tr("view.auto_rotate"))
                    .changed()
                {
                    hud.actions.push(UiAction::SetAutoRotate(hud.auto_rotate));
                }

                ui.menu_button(i18n::tr("view.input_sensitivity"), |ui| {
                    if ui
                        .add(
                            egui::Slider::new(&mut hud.sensitivity, 0.02..=0.5)
                                .text(i18n::tr("view.degrees_per_pixel")),
                        )
                        .changed()
                    {
                        hud.actions.push(UiAction::SetSensitivity(hud.sensitivity));
                    }
                });

                ui.separator();
                if ui.checkbox(&mut hud.show_fps, i18n::tr("view.show_fps")).clicked() {
                    ui.close_menu();
                }
            });

            // Language
            ui.menu_button(i18n::tr("menu.language"), |ui| {
                for (code, name) in i18n::LANGUAGES {
                    if ui.radio(hud.lang == code, name).clicked() {
                        hud.actions.push(UiAction::SetLanguage(code.to_string()));
                        ui.close_menu();
                    }
                }
            });
        });
    });

    // 热点标签：把公告板中心投到屏幕上
    let screen = ctx.screen_rect();
    let painter = ctx.layer_painter(egui::LayerId::background());
    let view_proj = frame.view.view_proj();
    for b in frame.billboards {
        let Some(label) = &b.label else { continue };
        let clip = view_proj * b.center.extend(1.0);
        if clip.w <= 0.0 {
            continue;
        }
        let ndc = clip.truncate() / clip.w;
        if ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 {
            continue;
        }
        let pos = egui::pos2(
            screen.left() + (ndc.x + 1.0) / 2.0 * screen.width(),
            screen.top() + (1.0 - ndc.y) / 2.0 * screen.height() + 18.0,
        );
        painter.text(
            pos,
            egui::Align2::CENTER_TOP,
            label,
            egui::FontId::proportional(15.0),
            egui::Color32::WHITE,
        );
    }

    // 当前区域旁白
    if let Some(region) = frame.region {
        egui::Area::new("region_label")
            .anchor(egui::Align2::CENTER_TOP, [0.0, 36.0])
            .interactable(false)
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.label(egui::RichText::new(&region.name).size(20.0).strong());
                });
            });
    }

    egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
        ui.horizontal(|ui| {
            if frame.loading {
                ui.label(
                    egui::RichText::new(i18n::tr("status.loading_scene"))
                        .color(egui::Color32::YELLOW),
                );
                ui.label("|");
            }

            match frame.scene {
                Some(scene) => {
                    let title = scene
                        .spec
                        .title
                        .clone()
                        .unwrap_or_else(|| scene.id().to_string());
                    ui.label(format!("{} {}", i18n::tr("status.scene_prefix"), title));
                }
                None => {
                    ui.label(i18n::tr("status.placeholder"));
                }
            }

            if let Some(region) = frame.region {
                ui.label("|");
                ui.label(format!("{} {}", i18n::tr("status.region_prefix"), region.name));
            }

            ui.label("|");
            ui.label(format!("FOV: {:.1}°", frame.view.fov));
            ui.label("|");

            {
                // 竖直视场角 → 全画幅（24mm 高）等效焦距
                let fov_rad = frame.view.fov.to_radians();
                let equiv_focal = 24.0 / (2.0 * (fov_rad * 0.5).tan());
                ui.label(format!(
                    "{} {:.1}mm",
                    i18n::tr("status.equiv_focal_prefix"),
                    equiv_focal
                ));
            }

            ui.label("|");
            ui.label(format!("Heading: {:.1}°", normalize_heading(frame.view.heading)));
            ui.label("|");
            ui.label(format!("Pitch: {:.1}°", frame.view.pitch));

            if hud.show_fps {
                ui.label("|");
                ui.label(
                    egui::RichText::new(format!("FPS: {:.1}", hud.fps)).color(egui::Color32::GREEN),
                );
            }

            if let Some(status) = &hud.status {
                ui.label("|");
                ui.label(egui::RichText::new(status).color(egui::Color32::LIGHT_RED));
            }
        });
    });
}
