//! Windowed host for a small render graph:
//!
//! ```text
//! orb (shader) -> trail (feedback) [-> tint (shader) <- image (asset)] -> window
//! ```
//!
//! Usage: `minigl-demo-feedback-graph [config.json] [image.png]`
use std::ffi::CString;
use std::num::NonZeroU32;
use std::path::PathBuf;

use minigl_core::{load_engine_config_from, EngineConfig, EngineError, NodeId};
use minigl_graph::{AssetSource, Engine, NodeSpec, UniformValue};
use minigl_runtime_glow::GlowBackend;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use winit::event::{ElementState, Event, MouseButton, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

use glutin::display::GetGlDisplay;
use glutin::prelude::*;
use raw_window_handle::HasRawWindowHandle;

const ORB_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 fragColor;

uniform float uTime;
uniform vec2  uMouse;
uniform bool  uMouseDown;
uniform float uAspect;

void main() {
    vec2 drift = vec2(0.5 + 0.25 * sin(uTime * 0.7), 0.5 + 0.25 * cos(uTime * 0.8));
    vec2 c = uMouseDown ? uMouse : drift;
    vec2 d = (v_uv - c) * vec2(uAspect, 1.0);
    float dot = smoothstep(0.06, 0.0, length(d));
    fragColor = vec4(dot, dot * 0.7, dot, 1.0);
}
"#;

const TRAIL_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 fragColor;

uniform sampler2D u_src;
uniform sampler2D previous;
uniform vec2  uPixelSize;
uniform float uDecay;

void main() {
    vec2 off = vec2(0.0, 1.5) * uPixelSize;
    vec4 prev = texture(previous, v_uv - off) * uDecay;
    fragColor = max(prev, texture(u_src, v_uv));
}
"#;

const TINT_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 fragColor;

uniform sampler2D u_src;
uniform sampler2D u_image;
uniform float uMix;

void main() {
    vec4 image = texture(u_image, vec2(v_uv.x, 1.0 - v_uv.y));
    fragColor = mix(texture(u_src, v_uv), image * texture(u_src, v_uv).r, uMix);
}
"#;

fn main() {
    if let Err(e) = run() {
        eprintln!("[feedback_graph] error: {e}");
        std::process::exit(1);
    }
}

fn nonzero(v: u32) -> NonZeroU32 {
    NonZeroU32::new(v).unwrap_or(NonZeroU32::MIN)
}

fn build_graph(engine: &mut Engine<GlowBackend>, image: Option<PathBuf>) -> Result<NodeId, EngineError> {
    let orb = engine.create_node("orb", NodeSpec::shader(ORB_FRAG))?;
    let trail = engine.create_node("trail", NodeSpec::feedback(TRAIL_FRAG))?;
    engine.connect(trail, "u_src", orb)?;
    engine.update_uniform(trail, "uDecay", UniformValue::Float(0.975))?;

    let Some(path) = image else {
        return Ok(trail);
    };
    let img = engine.create_node("image", NodeSpec::Asset(AssetSource::Image(path)))?;
    let tint = engine.create_node("tint", NodeSpec::shader(TINT_FRAG))?;
    engine.connect(tint, "u_src", trail)?;
    engine.connect(tint, "u_image", img)?;
    engine.update_uniform(tint, "uMix", UniformValue::Float(0.6))?;
    Ok(tint)
}

fn run() -> Result<(), EngineError> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => load_engine_config_from(path)?,
        None => EngineConfig::default(),
    };
    let image = args.next().map(PathBuf::from);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let event_loop = EventLoop::new();

    let window_builder = WindowBuilder::new()
        .with_title("minigl: feedback graph")
        .with_inner_size(winit::dpi::PhysicalSize::new(config.width, config.height));

    let template = glutin::config::ConfigTemplateBuilder::new().with_alpha_size(8);

    let display_builder =
        glutin_winit::DisplayBuilder::new().with_window_builder(Some(window_builder));

    let (window, gl_config) = display_builder
        .build(&event_loop, template, |mut configs| {
            configs.next().expect("display offers at least one GL config")
        })
        .map_err(|e| EngineError::BackendCreate(format!("DisplayBuilder.build: {e}")))?;

    let window = window.ok_or_else(|| {
        EngineError::BackendCreate("DisplayBuilder did not create a window".into())
    })?;
    let gl_display = gl_config.display();

    let raw_window_handle = window.raw_window_handle();

    let context_attributes = glutin::context::ContextAttributesBuilder::new()
        .with_profile(glutin::context::GlProfile::Core)
        .build(Some(raw_window_handle));

    let not_current_gl_context = unsafe {
        gl_display
            .create_context(&gl_config, &context_attributes)
            .map_err(|e| EngineError::BackendCreate(format!("create_context: {e}")))?
    };

    let size = window.inner_size();
    let attrs = glutin::surface::SurfaceAttributesBuilder::<glutin::surface::WindowSurface>::new()
        .build(raw_window_handle, nonzero(size.width), nonzero(size.height));

    let gl_surface = unsafe {
        gl_display
            .create_window_surface(&gl_config, &attrs)
            .map_err(|e| EngineError::BackendCreate(format!("create_window_surface: {e}")))?
    };

    let gl_context = not_current_gl_context
        .make_current(&gl_surface)
        .map_err(|e| EngineError::BackendCreate(format!("make_current: {e}")))?;

    let gl = unsafe {
        glow::Context::from_loader_function(|s| match CString::new(s) {
            Ok(name) => gl_display.get_proc_address(name.as_c_str()) as *const _,
            Err(_) => std::ptr::null(),
        })
    };

    let surface = (size.width.max(1), size.height.max(1));
    let backend = unsafe { GlowBackend::new(gl, surface.0, surface.1)? };
    let mut engine = Engine::new(
        backend,
        EngineConfig {
            width: surface.0,
            height: surface.1,
            ..config
        },
    )?;

    let output = build_graph(&mut engine, image)?;
    engine.set_output(Some(output))?;
    info!(nodes = engine.len(), "graph ready");

    let mut cursor = [0.5_f32, 0.5_f32];
    let mut mouse_down = false;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,

                WindowEvent::Resized(physical_size) => {
                    let w = physical_size.width.max(1);
                    let h = physical_size.height.max(1);
                    gl_surface.resize(&gl_context, nonzero(w), nonzero(h));
                    if let Err(e) = engine.resize(w, h) {
                        warn!(error = %e, "resize failed");
                    }
                    window.request_redraw();
                }

                WindowEvent::CursorMoved { position, .. } => {
                    let (w, h) = engine.surface_size();
                    cursor = [
                        position.x as f32 / w as f32,
                        1.0 - position.y as f32 / h as f32,
                    ];
                    engine.set_pointer(cursor[0], cursor[1], mouse_down);
                }

                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Left,
                    ..
                } => {
                    mouse_down = state == ElementState::Pressed;
                    engine.set_pointer(cursor[0], cursor[1], mouse_down);
                }

                _ => {}
            },

            Event::MainEventsCleared => window.request_redraw(),

            Event::RedrawRequested(_) => {
                match engine.tick() {
                    Ok(report) => {
                        for (node, err) in &report.failures {
                            warn!(node = %node, frame = report.frame, error = %err, "node failed");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "frame failed");
                    }
                }

                if let Err(e) = gl_surface.swap_buffers(&gl_context) {
                    warn!(error = %e, "swap_buffers failed");
                    *control_flow = ControlFlow::Exit;
                }
            }

            Event::LoopDestroyed => {
                engine.dispose_all();
                info!("shut down");
            }

            _ => {}
        }
    });
}
