//! SSAO viewer
//!
//! Opens a window, uploads a small scene and drives the deferred renderer. Keys:
//! `O` toggles ambient occlusion, `C` cycles the debug view, `M` switches between the
//! animated and manual camera, WASD/QE move the manual camera, `Esc` quits.

use std::path::PathBuf;

use deferred_core::foundation::logging;
use deferred_core::prelude::*;
use deferred_core::render::backends::vulkan::resources::checker_pixels;
use deferred_core::scene::MeshHandle;
use thiserror::Error;

const CONFIG_PATH: &str = "resources/config/viewer.ron";
const CHECKER_SIZE: u32 = 256;
const MANUAL_STEP: f32 = 0.25;

#[derive(Error, Debug)]
enum ViewerError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("window: {0}")]
    Window(#[from] deferred_core::render::backends::vulkan::WindowError),

    #[error("renderer: {0}")]
    Renderer(#[from] VulkanError),
}

/// Fly-through around the scene, looping
fn camera_track() -> CameraAnimation {
    let mut track = CameraAnimation::new();
    track.add_keyframe(0.0, Vec3::new(0.0, 1.0, 6.0), Vec3::new(-0.15, 0.0, 0.0));
    track.add_keyframe(4.0, Vec3::new(5.0, 1.5, 2.0), Vec3::new(-0.2, 1.2, 0.0));
    track.add_keyframe(8.0, Vec3::new(2.0, 3.0, -4.5), Vec3::new(-0.5, 2.7, 0.0));
    track.add_keyframe(12.0, Vec3::new(-4.5, 1.2, -1.0), Vec3::new(-0.1, -1.8, 0.0));
    track.add_keyframe(16.0, Vec3::new(0.0, 1.0, 6.0), Vec3::new(-0.15, 0.0, 0.0));
    track
}

fn build_scene(renderer: &mut DeferredRenderer) -> Result<Scene, VulkanError> {
    let cube = renderer.upload_mesh(&Mesh::cube(1.0))?;
    let floor = renderer.upload_mesh(&Mesh::plane(12.0))?;
    let checker = renderer.upload_texture(
        CHECKER_SIZE,
        CHECKER_SIZE,
        &checker_pixels(CHECKER_SIZE, 8, [200, 200, 200, 255], [60, 60, 70, 255]),
    )?;

    let mut scene = Scene::new(PointLight {
        position: Vec3::new(2.0, 4.0, 3.0),
        color: Vec3::new(1.0, 0.95, 0.85),
        intensity: 20.0,
    });
    scene.add(SceneObject::new(floor, Vec3::new(0.0, -1.0, 0.0), 1.0).with_texture(checker));
    add_cubes(&mut scene, cube, checker);
    Ok(scene)
}

/// A cluster of cubes close enough together to occlude each other
fn add_cubes(scene: &mut Scene, cube: MeshHandle, texture: u32) {
    let placements = [
        (Vec3::new(0.0, -0.5, 0.0), 1.0),
        (Vec3::new(1.1, -0.6, 0.2), 0.8),
        (Vec3::new(-0.9, -0.7, 0.6), 0.6),
        (Vec3::new(0.3, 0.4, -0.2), 0.7),
        (Vec3::new(-2.0, -0.25, -1.5), 1.5),
    ];
    for (index, (position, scale)) in placements.into_iter().enumerate() {
        let object = SceneObject::new(cube, position, scale);
        scene.add(if index % 2 == 0 { object.with_texture(texture) } else { object });
    }
}

fn toggle_for(key: Key) -> Option<ToggleAction> {
    match key {
        Key::O => Some(ToggleAction::ToggleOcclusion),
        Key::C => Some(ToggleAction::CycleDebugView),
        Key::M => Some(ToggleAction::ToggleCameraMode),
        _ => None,
    }
}

/// Manual camera translation in camera space
fn manual_offset(key: Key) -> Option<Vec3> {
    match key {
        Key::W => Some(Vec3::new(0.0, 0.0, -MANUAL_STEP)),
        Key::S => Some(Vec3::new(0.0, 0.0, MANUAL_STEP)),
        Key::A => Some(Vec3::new(-MANUAL_STEP, 0.0, 0.0)),
        Key::D => Some(Vec3::new(MANUAL_STEP, 0.0, 0.0)),
        Key::Q => Some(Vec3::new(0.0, -MANUAL_STEP, 0.0)),
        Key::E => Some(Vec3::new(0.0, MANUAL_STEP, 0.0)),
        _ => None,
    }
}

fn run(config_path: PathBuf) -> Result<(), ViewerError> {
    let config = RendererConfig::load(&config_path)?;
    logging::init(&config.log_level);
    log::info!("Loaded configuration from {}", config_path.display());

    let (sender, receiver) = surface_channel();
    let mut window = Window::new(&config.window, sender)?;
    let mut renderer = DeferredRenderer::new(&mut window, &config, receiver)?;
    let scene = build_scene(&mut renderer)?;

    let extent = renderer.extent();
    let mut camera = Camera::perspective(
        Vec3::new(0.0, 1.0, 6.0),
        60.0,
        extent.width as f32 / extent.height.max(1) as f32,
        0.1,
        100.0,
    );
    let track = camera_track();
    let mut clock = AnimationClock::default();
    let mut toggles = RuntimeToggles::new(config.occlusion.enabled, config.debug_view, config.camera_mode);
    let mut timer = Timer::new();

    while !window.should_close() && !renderer.close_requested() {
        for press in window.pump_events() {
            if press.key == Key::Escape {
                window.set_should_close(true);
            } else if let Some(action) = toggle_for(press.key) {
                if toggles.apply(action) {
                    clock.reset();
                }
            } else if let Some(offset) = manual_offset(press.key) {
                if toggles.camera_mode == CameraMode::Manual {
                    camera.position += camera.orientation * offset;
                }
            }
        }

        let delta_time = timer.tick();
        if toggles.camera_mode == CameraMode::Animated {
            let time = clock.advance(delta_time, track.end_time());
            if let Some((position, rotation)) = track.sample(time) {
                camera.position = position;
                camera.orientation = rotation;
            }
        }

        let extent = renderer.extent();
        if extent.height > 0 {
            camera.set_aspect_ratio(extent.width as f32 / extent.height as f32);
        }

        let input = FrameInput {
            scene: &scene,
            camera: &camera,
            toggles: &toggles,
            delta_time,
        };
        if renderer.render(&input)? == FrameOutcome::Skipped {
            let (width, height) = window.get_framebuffer_size();
            if width == 0 || height == 0 {
                window.wait_events();
            }
        }

        if timer.frame_count() % 600 == 0 {
            log::debug!("{:.1} fps average", timer.average_fps());
        }
    }

    log::info!("Viewer closed after {} frames", timer.frame_count());
    Ok(())
}

fn main() {
    let config_path = std::env::args().nth(1).map_or_else(|| PathBuf::from(CONFIG_PATH), PathBuf::from);
    if let Err(e) = run(config_path) {
        log::error!("{}", e);
        eprintln!("ssao_viewer: {}", e);
        std::process::exit(1);
    }
}
