use std::collections::HashSet;
use std::f32::consts::PI;
use std::num::NonZeroU32;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use tile_raycaster::present::{Filter, Presenter};
use tile_raycaster::texture::{pack_argb, pack_rgb};
use tile_raycaster::{
    Drawable, FrameOutcome, Grid, Layer, Pose, RenderConfig, Renderer, SpriteInstance, Texture, TextureId,
    TextureStore, Tile,
};

const CONFIG_PATH: &str = "raycaster.toml";

const BRICK: TextureId = TextureId(1);
const STONE: TextureId = TextureId(2);
const FLOOR: TextureId = TextureId(3);
const CEILING: TextureId = TextureId(4);
const GLASS: TextureId = TextureId(5);
const LAMP_ON: TextureId = TextureId(10);
const LAMP_OFF: TextureId = TextureId(11);
const BARREL: TextureId = TextureId(12);
const PLAQUE: TextureId = TextureId(13);

// player radius, world units
const BODY: f32 = 12.0;

struct App {
    window: Option<Rc<Window>>,
    surface: Option<softbuffer::Surface<Rc<Window>, Rc<Window>>>,
    renderer: Renderer,
    presenter: Presenter,
    sprites: Vec<SpriteInstance>,
    pose: Pose,
    started: Instant,

    // HUD
    frame_counter: u32,
    stale_counter: u32,
    last_fps_print: Instant,

    // Input and movement
    keys_down: HashSet<KeyCode>,
    last_tick: Instant,
    move_speed: f32,
    turn_speed: f32,
}

/// Filled disc on a transparent square.
fn disc(size: usize, color: u32) -> Texture {
    let r = size as f32 / 2.0;
    let pixels = (0..size * size)
        .map(|i| {
            let dx = (i % size) as f32 + 0.5 - r;
            let dy = (i / size) as f32 + 0.5 - r;
            if dx * dx + dy * dy <= r * r { color } else { pack_argb(0, 0, 0, 0) }
        })
        .collect();
    Texture::new(size, size, pixels).expect("disc texture")
}

fn textures() -> TextureStore {
    TextureStore::default()
        .with(BRICK, Texture::bricks(32, pack_rgb(140, 56, 40), pack_rgb(190, 185, 170)))
        .with(STONE, Texture::checker(32, 4, pack_rgb(110, 110, 120), pack_rgb(90, 90, 100)))
        .with(FLOOR, Texture::checker(32, 2, pack_rgb(70, 60, 50), pack_rgb(55, 45, 40)))
        .with(CEILING, Texture::solid(pack_rgb(35, 35, 60)))
        .with(GLASS, Texture::solid(pack_rgb(90, 180, 230)).into_translucent())
        .with(LAMP_ON, disc(16, pack_rgb(255, 220, 120)))
        .with(LAMP_OFF, disc(16, pack_rgb(120, 100, 60)))
        .with(BARREL, disc(16, pack_rgb(150, 90, 30)))
        .with(PLAQUE, Texture::checker(16, 2, pack_rgb(200, 170, 40), pack_rgb(160, 130, 20)))
}

fn room(tile_size: f32) -> Grid {
    let mut grid = Grid::bordered(10, 10, tile_size, BRICK, FLOOR, CEILING).expect("room grid");
    grid.set_tile(3, 6, Tile::wall(STONE));
    for z in 2..5 {
        grid.set_tile(6, z, Tile::wall(GLASS));
    }
    grid
}

fn sprites(tile: f32) -> Vec<SpriteInstance> {
    let at = |x: f32, z: f32| [x * tile, z * tile];
    vec![
        SpriteInstance::new(at(7.5, 3.5), Drawable::Static(BARREL)),
        SpriteInstance::new(at(2.5, 7.5), Drawable::Static(BARREL)).with_scale(0.4),
        SpriteInstance::new(
            at(5.0, 5.0),
            Drawable::Animated {
                frames: vec![LAMP_ON, LAMP_OFF],
                frame_time: 0.5,
            },
        )
        .with_scale(0.25)
        .with_base_y(0.2),
        SpriteInstance::new(
            at(9.0 - 0.01, 5.0),
            Drawable::DepthBiased {
                texture: PLAQUE,
                bias: tile * 0.1,
            },
        )
        .with_layer(Layer::Background)
        .with_scale(0.3),
    ]
}

fn load_config() -> RenderConfig {
    if !Path::new(CONFIG_PATH).exists() {
        return RenderConfig::default();
    }
    match RenderConfig::load(CONFIG_PATH) {
        Ok(config) => {
            info!(path = CONFIG_PATH, "loaded config");
            config
        }
        Err(err) => {
            warn!(path = CONFIG_PATH, %err, "bad config, using defaults");
            RenderConfig::default()
        }
    }
}

impl App {
    fn new(config: RenderConfig) -> Self {
        let tile = config.tile_size;
        let renderer = Renderer::new(config, Arc::new(room(tile)), Arc::new(textures())).expect("renderer");
        Self {
            window: None,
            surface: None,
            renderer,
            presenter: Presenter::new(Filter::Nearest),
            sprites: sprites(tile),
            pose: Pose::new(2.5 * tile, 2.5 * tile, 0.0),
            started: Instant::now(),

            frame_counter: 0,
            stale_counter: 0,
            last_fps_print: Instant::now(),

            keys_down: HashSet::new(),
            last_tick: Instant::now(),
            move_speed: 3.0 * tile,
            turn_speed: PI,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let config = self.renderer.config();
        let attributes = Window::default_attributes()
            .with_title("Tile Raycaster")
            .with_inner_size(LogicalSize::new(
                config.screen_width as f64 * 2.0,
                config.screen_height as f64 * 2.0,
            ));

        let window = Rc::new(event_loop.create_window(attributes).expect("create window"));

        let context = softbuffer::Context::new(window.clone()).expect("softbuffer context");
        let surface = softbuffer::Surface::new(&context, window.clone()).expect("softbuffer surface");

        if !self.renderer.wait_until_ready(Duration::from_secs(1)) {
            warn!("workers not ready yet, first frames fall back");
        }

        self.surface = Some(surface);
        self.last_tick = Instant::now();
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("close requested, stopping");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput {
                event: KeyEvent {
                    physical_key: PhysicalKey::Code(code),
                    state,
                    repeat,
                    ..
                },
                ..
            } => match state {
                ElementState::Pressed => {
                    if code == KeyCode::KeyF && !repeat {
                        let next = match self.presenter.filter() {
                            Filter::Nearest => Filter::Bilinear,
                            Filter::Bilinear => Filter::Nearest,
                        };
                        self.presenter.set_filter(next);
                    }
                    self.keys_down.insert(code);
                }
                ElementState::Released => {
                    self.keys_down.remove(&code);
                }
            },

            WindowEvent::RedrawRequested => {
                self.tick();

                let (window, surface) = match (&self.window, &mut self.surface) {
                    (Some(w), Some(s)) if w.id() == id => (w, s),
                    _ => return,
                };

                let size = window.inner_size();
                let (Some(dw), Some(dh)) = (NonZeroU32::new(size.width), NonZeroU32::new(size.height)) else {
                    // minimized
                    return;
                };
                surface.resize(dw, dh).expect("resize surface");

                let time = self.started.elapsed().as_secs_f32();
                let stats = self.renderer.render(&self.pose, &self.sprites, time);
                if stats.frame != FrameOutcome::Fresh {
                    self.stale_counter += 1;
                }

                let fb = self.renderer.framebuffer();
                let mut buf = surface.buffer_mut().expect("buffer_mut");
                self.presenter
                    .blit(&fb.pixels, fb.width, fb.height, &mut buf, dw.get() as usize);
                buf.present().expect("present");

                self.frame_counter += 1;
                let now = Instant::now();
                let elapsed = now.duration_since(self.last_fps_print).as_secs_f32();
                if elapsed >= 1.0 {
                    info!(
                        fps = %format!("{:.1}", self.frame_counter as f32 / elapsed),
                        stale = self.stale_counter,
                        walls = stats.wall_draws,
                        sprites = stats.sprites_drawn,
                        "frame stats"
                    );
                    self.frame_counter = 0;
                    self.stale_counter = 0;
                    self.last_fps_print = now;
                }

                window.request_redraw();
            }
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

impl App {
    fn tick(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).min(Duration::from_millis(100));
        self.last_tick = now;
        let dt = dt.as_secs_f32();

        let held = |k: KeyCode| if self.keys_down.contains(&k) { 1.0f32 } else { 0.0 };
        let mut fwd = held(KeyCode::KeyW) - held(KeyCode::KeyS);
        let mut strafe = held(KeyCode::KeyD) - held(KeyCode::KeyA);
        let turn = held(KeyCode::KeyE) - held(KeyCode::KeyQ);

        let len = (fwd * fwd + strafe * strafe).sqrt();
        if len > 0.0 {
            fwd /= len;
            strafe /= len;
        }

        self.pose.angle = (self.pose.angle + turn * self.turn_speed * dt).rem_euclid(2.0 * PI);

        if len > 0.0 {
            let (s, c) = self.pose.angle.sin_cos();
            let step = self.move_speed * dt;
            let dx = (c * fwd - s * strafe) * step;
            let dz = (s * fwd + c * strafe) * step;
            // slide along walls one axis at a time
            if self.free(self.pose.x + dx, self.pose.z) {
                self.pose.x += dx;
            }
            if self.free(self.pose.x, self.pose.z + dz) {
                self.pose.z += dz;
            }
        }
        self.pose = self.renderer.grid().clamp_pose(&self.pose);
    }

    fn free(&self, x: f32, z: f32) -> bool {
        let grid = self.renderer.grid();
        [(-BODY, -BODY), (BODY, -BODY), (-BODY, BODY), (BODY, BODY)]
            .iter()
            .all(|(ox, oz)| grid.tile_at(x + ox, z + oz).is_some_and(|t| !t.is_wall()))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let event_loop = EventLoop::new().expect("event loop");
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new(load_config());
    if let Err(err) = event_loop.run_app(&mut app) {
        warn!(%err, "event loop exited with an error");
    }
}
