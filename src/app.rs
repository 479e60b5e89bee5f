//! Grid window - one per process, all sharing the same grid through shared memory
//!
//! `AppContext` owns everything a process needs: its window and drawing
//! surface, its attachment to the shared region and the update channel, and
//! the local color state. Every input handler mutates the shared region,
//! broadcasts, and lets each window (this one included) repaint from it.

use crate::broadcast::{UpdateBroadcaster, UPDATE_CHANNEL};
use crate::color::{ColorRng, HueAccumulator, WHEEL_DELTA};
use crate::config::{Config, ConfigStore};
use crate::error::GridError;
use crate::grid::{CellMark, GridState};
use crate::launcher::launch_editor;
use crate::render::{cell_at, render, Canvas};
use crate::shared::{SharedRegion, SHARED_MEM_NAME};
use anyhow::{anyhow, Context, Result};
use softbuffer::Surface;
use std::num::NonZeroU32;
use std::rc::Rc;
use tracing::{debug, error, info, warn};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, Event, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop, EventLoopBuilder, EventLoopWindowTarget};
use winit::keyboard::{Key, ModifiersState, NamedKey};
use winit::window::{Window, WindowBuilder};

pub const WINDOW_TITLE: &str = "IPC Grid";
/// Horizontal gap between neighbouring instances
const WINDOW_GAP: i32 = 10;
const WINDOW_TOP: i32 = 100;

/// Events injected into the winit loop from outside the window system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEvent {
    /// Another instance (or this one) wrote the shared region
    SharedStateChanged { generation: u64 },
}

/// Keyboard commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RandomBackground,
    Close,
    EditConfig,
}

/// Map a pressed key to its command.
///
/// Enter picks a new background, Esc or Ctrl+Q closes the window and Shift+C
/// opens the config file.
pub fn action_for_key(key: &Key, modifiers: ModifiersState) -> Option<Action> {
    match key {
        Key::Named(NamedKey::Enter) => Some(Action::RandomBackground),
        Key::Named(NamedKey::Escape) => Some(Action::Close),
        Key::Character(c) if c.eq_ignore_ascii_case("q") && modifiers.control_key() => {
            Some(Action::Close)
        }
        Key::Character(c) if c.eq_ignore_ascii_case("c") && modifiers.shift_key() => {
            Some(Action::EditConfig)
        }
        _ => None,
    }
}

pub struct AppContext {
    window: Rc<Window>,
    surface: Surface<Rc<Window>, Rc<Window>>,
    region: SharedRegion,
    broadcaster: UpdateBroadcaster,
    hue: HueAccumulator,
    rng: ColorRng,
    config: Config,
    store: Box<dyn ConfigStore>,
    cursor: Option<PhysicalPosition<f64>>,
    modifiers: ModifiersState,
}

impl AppContext {
    fn new(
        event_loop: &EventLoop<UserEvent>,
        config: Config,
        store: Box<dyn ConfigStore>,
    ) -> Result<Self> {
        let seed = GridState::new(config.grid_size, config.background, config.grid_color);
        let region = SharedRegion::create_or_attach(SHARED_MEM_NAME, &seed)
            .context("Shared grid state is unavailable")?;

        let broadcaster =
            UpdateBroadcaster::join(UPDATE_CHANNEL).context("Update channel is unavailable")?;

        // Line instances up side by side
        let x = region.slot() as i32 * (config.client_width as i32 + WINDOW_GAP);
        let builder = WindowBuilder::new()
            .with_title(WINDOW_TITLE)
            .with_inner_size(PhysicalSize::new(config.client_width, config.client_height))
            .with_position(PhysicalPosition::new(x, WINDOW_TOP));

        #[cfg(windows)]
        let builder = {
            use winit::platform::windows::WindowBuilderExtWindows;
            builder.with_class_name(crate::broadcast::WINDOW_CLASS)
        };

        let window = Rc::new(builder.build(event_loop).context("Failed to create window")?);
        info!("Window opened at x={} for instance {}", x, region.slot());

        #[cfg(windows)]
        install_update_hook(&window, &broadcaster)?;

        #[cfg(unix)]
        spawn_update_listener(&broadcaster, event_loop)?;

        let context = softbuffer::Context::new(window.clone())
            .map_err(|e| anyhow!("Failed to create drawing context: {}", e))?;
        let surface = Surface::new(&context, window.clone())
            .map_err(|e| anyhow!("Failed to create drawing surface: {}", e))?;

        Ok(Self {
            window,
            surface,
            region,
            broadcaster,
            hue: HueAccumulator::new(),
            rng: ColorRng::from_entropy(),
            config,
            store,
            cursor: None,
            modifiers: ModifiersState::empty(),
        })
    }

    fn handle_window_event(&mut self, event: WindowEvent, elwt: &EventLoopWindowTarget<UserEvent>) {
        match event {
            WindowEvent::CloseRequested => elwt.exit(),
            WindowEvent::Resized(_) => self.window.request_redraw(),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    error!("Redraw failed: {:#}", e);
                }
            }
            WindowEvent::CursorMoved { position, .. } => self.cursor = Some(position),
            WindowEvent::CursorLeft { .. } => self.cursor = None,
            WindowEvent::ModifiersChanged(modifiers) => self.modifiers = modifiers.state(),
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button,
                ..
            } => match button {
                MouseButton::Left => self.mark_cell(CellMark::Circle),
                MouseButton::Right => self.mark_cell(CellMark::Cross),
                _ => {}
            },
            WindowEvent::MouseWheel { delta, .. } => self.scroll(delta),
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                if let Some(action) = action_for_key(&event.logical_key, self.modifiers) {
                    self.perform(action, elwt);
                }
            }
            _ => {}
        }
    }

    fn perform(&mut self, action: Action, elwt: &EventLoopWindowTarget<UserEvent>) {
        debug!("Action {:?}", action);
        match action {
            Action::RandomBackground => {
                let color = self.rng.background();
                let result = self.region.set_background(color);
                self.commit("background", result);
            }
            Action::Close => elwt.exit(),
            Action::EditConfig => {
                self.save_config();
                match self.store.path() {
                    Some(path) => {
                        if let Err(e) = launch_editor(path) {
                            warn!("{}", e);
                        }
                    }
                    None => warn!("Config store has no file to edit"),
                }
            }
        }
    }

    fn mark_cell(&mut self, mark: CellMark) {
        let Some(pos) = self.cursor else {
            return;
        };
        let client = self.window.inner_size();
        let size = self.region.read().grid.size();

        match cell_at(pos.x, pos.y, client.width, client.height, size) {
            Some((row, col)) => {
                let result = self.region.set_cell(row, col, mark);
                self.commit("cell", result);
            }
            None => debug!("Click at ({:.0}, {:.0}) hit no cell", pos.x, pos.y),
        }
    }

    fn scroll(&mut self, delta: MouseScrollDelta) {
        let delta = match delta {
            MouseScrollDelta::LineDelta(_, lines) => (lines * WHEEL_DELTA as f32) as i32,
            MouseScrollDelta::PixelDelta(pos) => pos.y as i32,
        };
        if delta == 0 {
            return;
        }

        let color = self.hue.advance(delta);
        let result = self.region.set_grid_color(color);
        self.commit("grid color", result);
    }

    /// Finish a shared write: tell every instance, then repaint here
    fn commit(&self, what: &str, result: Result<(), GridError>) {
        if let Err(e) = result {
            warn!("{} not changed: {}", what, e);
            return;
        }

        let generation = self.region.generation();
        let report = self.broadcaster.notify_all(generation);
        debug!(
            "Generation {}: {} notified, {} unresponsive, {} pruned",
            generation, report.delivered, report.unresponsive, report.pruned
        );
        self.window.request_redraw();
    }

    fn redraw(&mut self) -> Result<()> {
        let client = self.window.inner_size();
        let (Some(width), Some(height)) =
            (NonZeroU32::new(client.width), NonZeroU32::new(client.height))
        else {
            // Minimized
            return Ok(());
        };

        self.surface
            .resize(width, height)
            .map_err(|e| anyhow!("Failed to resize surface: {}", e))?;

        let state = self.region.read();
        let mut buffer = self
            .surface
            .buffer_mut()
            .map_err(|e| anyhow!("Failed to get pixel buffer: {}", e))?;
        render(
            &mut Canvas::new(&mut buffer, client.width, client.height),
            &state,
        );
        buffer
            .present()
            .map_err(|e| anyhow!("Failed to present frame: {}", e))?;

        Ok(())
    }

    /// Persist the shared grid settings plus this window's size
    fn save_config(&mut self) {
        let state = self.region.read();
        self.config.grid_size = state.grid.size();
        self.config.background = state.background;
        self.config.grid_color = state.grid_color;

        let client = self.window.inner_size();
        if client.width > 0 && client.height > 0 {
            self.config.client_width = client.width;
            self.config.client_height = client.height;
        }

        if let Err(e) = self.store.save(&self.config) {
            warn!("Failed to save config: {:#}", e);
        }
    }
}

#[cfg(windows)]
fn install_update_hook(window: &Window, broadcaster: &UpdateBroadcaster) -> Result<()> {
    use winit::raw_window_handle::{HasWindowHandle, RawWindowHandle};

    let handle = window
        .window_handle()
        .map_err(|e| anyhow!("No native window handle: {}", e))?;
    match handle.as_raw() {
        RawWindowHandle::Win32(win32) => {
            crate::broadcast::install_repaint_hook(win32.hwnd.get(), broadcaster.message_id())
                .context("Failed to hook update message")
        }
        _ => Err(anyhow!("Unexpected window handle type")),
    }
}

/// Forward update notices from the socket into the event loop
#[cfg(unix)]
fn spawn_update_listener(
    broadcaster: &UpdateBroadcaster,
    event_loop: &EventLoop<UserEvent>,
) -> Result<()> {
    use crate::broadcast::BroadcastMessage;

    let listener = broadcaster
        .listener()
        .context("Failed to open update listener")?;
    let proxy = event_loop.create_proxy();

    std::thread::Builder::new()
        .name("update-listener".to_string())
        .spawn(move || loop {
            match listener.recv() {
                Ok(BroadcastMessage::StateChanged { origin, generation }) => {
                    debug!("Update from {} (generation {})", origin, generation);
                    if proxy
                        .send_event(UserEvent::SharedStateChanged { generation })
                        .is_err()
                    {
                        // Event loop is gone
                        break;
                    }
                }
                Err(e) => {
                    warn!("Update listener stopped: {}", e);
                    break;
                }
            }
        })
        .context("Failed to spawn update listener")?;

    Ok(())
}

/// Create the window and run until it closes. Saves the config on the way out.
pub fn run(config: Config, store: Box<dyn ConfigStore>) -> Result<()> {
    let event_loop = EventLoopBuilder::<UserEvent>::with_user_event()
        .build()
        .context("Failed to create event loop")?;

    let mut app = AppContext::new(&event_loop, config, store)?;

    event_loop
        .run(move |event, elwt| {
            elwt.set_control_flow(ControlFlow::Wait);

            match event {
                Event::UserEvent(UserEvent::SharedStateChanged { .. }) => {
                    app.window.request_redraw();
                }
                Event::WindowEvent { event, window_id } if window_id == app.window.id() => {
                    app.handle_window_event(event, elwt);
                }
                Event::LoopExiting => app.save_config(),
                _ => {}
            }
        })
        .context("Event loop failed")?;

    Ok(())
}

/// Show a startup failure to the user. GUI builds have no console on Windows.
pub fn report_fatal(message: &str) {
    error!("{}", message);

    #[cfg(windows)]
    unsafe {
        use windows::core::PCWSTR;
        use windows::Win32::Foundation::HWND;
        use windows::Win32::UI::WindowsAndMessaging::{MessageBoxW, MB_ICONERROR, MB_OK};

        let text: Vec<u16> = message.encode_utf16().chain(Some(0)).collect();
        let caption: Vec<u16> = WINDOW_TITLE.encode_utf16().chain(Some(0)).collect();
        MessageBoxW(
            HWND::default(),
            PCWSTR(text.as_ptr()),
            PCWSTR(caption.as_ptr()),
            MB_OK | MB_ICONERROR,
        );
    }

    #[cfg(not(windows))]
    eprintln!("{}: {}", WINDOW_TITLE, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_picks_background() {
        let key = Key::Named(NamedKey::Enter);
        assert_eq!(
            action_for_key(&key, ModifiersState::empty()),
            Some(Action::RandomBackground)
        );
    }

    #[test]
    fn test_close_keys() {
        let esc = Key::Named(NamedKey::Escape);
        assert_eq!(action_for_key(&esc, ModifiersState::empty()), Some(Action::Close));

        let q = Key::Character("q".into());
        assert_eq!(action_for_key(&q, ModifiersState::CONTROL), Some(Action::Close));
        assert_eq!(action_for_key(&q, ModifiersState::empty()), None);
    }

    #[test]
    fn test_shift_c_edits_config() {
        let upper = Key::Character("C".into());
        assert_eq!(action_for_key(&upper, ModifiersState::SHIFT), Some(Action::EditConfig));

        let lower = Key::Character("c".into());
        assert_eq!(action_for_key(&lower, ModifiersState::empty()), None);
    }

    #[test]
    fn test_other_keys_do_nothing() {
        let space = Key::Named(NamedKey::Space);
        assert_eq!(action_for_key(&space, ModifiersState::SHIFT), None);
        let x = Key::Character("x".into());
        assert_eq!(action_for_key(&x, ModifiersState::CONTROL), None);
    }
}
