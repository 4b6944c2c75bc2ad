#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use mimalloc::MiMalloc;
use semver::Version;
use slint::ComponentHandle;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;
use tray_icon::menu::{IsMenuItem, Menu, MenuEvent, MenuItem, PredefinedMenuItem};
use tray_icon::{MouseButton, MouseButtonState, TrayIconBuilder, TrayIconEvent};

mod services;
use services::{
    clock,
    config::AppConfig,
    coordinator::{UpdateCoordinator, UpdateDisplay, UpdateEvent, UpdateMessage},
    logging, platform,
    prompt::DialogPrompt,
    settings::SettingsStore,
    update::GithubUpdater,
    version_ledger::VersionLedger,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

slint::include_modules!();

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const NOTICE_DURATION: Duration = Duration::from_secs(8);
const PROGRESS_HIDE_DELAY: Duration = Duration::from_millis(500);
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Download progress bar inside the clock window.
struct WindowDisplay {
    ui: slint::Weak<AppWindow>,
}

impl UpdateDisplay for WindowDisplay {
    fn progress(&self, percent: u8) {
        if let Some(ui) = self.ui.upgrade() {
            ui.set_progress_visible(true);
            ui.set_progress(f32::from(percent) / 100.0);
        }
    }

    fn download_finished(&self) {
        if let Some(ui) = self.ui.upgrade() {
            ui.set_progress(1.0);
        }
        let ui = self.ui.clone();
        slint::Timer::single_shot(PROGRESS_HIDE_DELAY, move || {
            if let Some(ui) = ui.upgrade() {
                ui.set_progress_visible(false);
            }
        });
    }
}

fn render_clock(ui: &AppWindow, use_24_hour: bool) {
    let face = clock::now(use_24_hour);
    ui.set_time_text(face.time_text().into());
    ui.set_suffix_text(face.suffix.into());
}

fn load_tray_icon() -> anyhow::Result<tray_icon::Icon> {
    let icon_bytes = include_bytes!(concat!(env!("OUT_DIR"), "/appicon.png"));
    let img = image::load_from_memory(icon_bytes)?;
    let rgba = img.resize(32, 32, image::imageops::FilterType::Lanczos3).to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(tray_icon::Icon::from_rgba(rgba.into_raw(), width, height)?)
}

fn hide_to_tray(ui: &AppWindow) {
    if let Err(err) = ui.window().hide() {
        tracing::warn!(error = %err, "failed to hide window");
    }
    platform::trim_own_memory();
}

fn show_window(ui: &AppWindow) {
    if let Err(err) = ui.window().show() {
        tracing::warn!(error = %err, "failed to show window");
    }
    ui.window().set_minimized(false);
}

fn toggle_window(ui: &slint::Weak<AppWindow>) {
    let Some(ui) = ui.upgrade() else { return };
    if ui.window().is_visible() {
        hide_to_tray(&ui);
    } else {
        show_window(&ui);
    }
}

fn shutdown(update_timer: &slint::Timer) {
    tracing::info!("shutting down");
    update_timer.stop();
    if let Err(err) = slint::quit_event_loop() {
        tracing::warn!(error = %err, "failed to stop event loop");
    }
}

fn main() -> Result<(), slint::PlatformError> {
    let config = AppConfig::from_env();
    let _log_guard = logging::init(&config.data_dir);
    tracing::info!(version = APP_VERSION, data_dir = %config.data_dir.display(), "desktop clock starting");

    let ui = AppWindow::new()?;

    // 1. Load Settings
    let settings_store = SettingsStore::open(&config.data_dir);
    let prefs = Rc::new(RefCell::new(settings_store.get()));
    let use_24_hour = prefs.borrow().use_24_hour;
    ui.set_use_twenty_four_hour(use_24_hour);
    render_clock(&ui, use_24_hour);

    // 2. "What's new" notice, decided against the previous run before recording this one
    let ledger = VersionLedger::open(&config.data_dir);
    if let Some(notice) = ledger.take_upgrade_notice(APP_VERSION) {
        tracing::info!(from = %notice.from, to = %notice.to, "application upgraded");
        ui.set_notice_text(format!("Updated to v{} (was v{})", notice.to, notice.from).into());
        let ui_weak = ui.as_weak();
        slint::Timer::single_shot(NOTICE_DURATION, move || {
            if let Some(ui) = ui_weak.upgrade() {
                ui.set_notice_text("".into());
            }
        });
    }

    // 3. Clock refresh
    let clock_timer = slint::Timer::default();
    let ui_handle_clock = ui.as_weak();
    let prefs_for_clock = prefs.clone();
    clock_timer.start(slint::TimerMode::Repeated, Duration::from_secs(1), move || {
        if let Some(ui) = ui_handle_clock.upgrade() {
            render_clock(&ui, prefs_for_clock.borrow().use_24_hour);
        }
    });

    // 4. Window Moving Logic
    let ui_handle_move = ui.as_weak();
    ui.on_move_window(move |delta_x, delta_y| {
        if let Some(ui) = ui_handle_move.upgrade() {
            let window = ui.window();
            let current_pos = window.position();
            let scale = window.scale_factor();
            window.set_position(slint::PhysicalPosition::new(
                current_pos.x + (delta_x * scale) as i32,
                current_pos.y + (delta_y * scale) as i32,
            ));
        }
    });

    // 5. 12/24-hour toggle, persisted eagerly
    let ui_handle_format = ui.as_weak();
    let prefs_for_toggle = prefs.clone();
    ui.on_toggle_format(move || {
        let mut prefs = prefs_for_toggle.borrow_mut();
        prefs.use_24_hour = !prefs.use_24_hour;
        settings_store.set(&prefs);
        tracing::info!(use_24_hour = prefs.use_24_hour, "clock format changed");
        if let Some(ui) = ui_handle_format.upgrade() {
            ui.set_use_twenty_four_hour(prefs.use_24_hour);
            render_clock(&ui, prefs.use_24_hour);
        }
    });

    // 6. Updates: collaborators post results to this channel, drained on the event loop below
    let (update_tx, update_rx) = mpsc::channel::<UpdateMessage>();
    let current_version = Version::parse(APP_VERSION).unwrap_or_else(|_| Version::new(0, 0, 0));
    let coordinator = Rc::new(RefCell::new(UpdateCoordinator::new(
        GithubUpdater::new(config.releases_url.clone(), current_version, update_tx.clone()),
        DialogPrompt::new(update_tx),
        WindowDisplay { ui: ui.as_weak() },
    )));

    let update_timer = Rc::new(slint::Timer::default());
    if config.updates_enabled {
        coordinator.borrow_mut().request_check();
        let coordinator_for_tick = coordinator.clone();
        update_timer.start(slint::TimerMode::Repeated, config.update_interval, move || {
            coordinator_for_tick.borrow_mut().tick();
        });
    } else {
        tracing::info!("automatic updates disabled");
    }

    // 7. System Tray
    let tray_menu = Menu::new();
    let toggle_item = MenuItem::new("Show/Hide", true, None);
    let check_item = MenuItem::new("Check for updates", config.updates_enabled, None);
    let install_item = MenuItem::new("Restart to update", false, None);
    let separator = PredefinedMenuItem::separator();
    let quit_item = MenuItem::new("Quit", true, None);
    let items: [&dyn IsMenuItem; 5] = [&toggle_item, &check_item, &install_item, &separator, &quit_item];
    if let Err(err) = tray_menu.append_items(&items) {
        tracing::warn!(error = %err, "failed to build tray menu");
    }

    let tray_icon = match platform::init_tray_support().and_then(|()| {
        let icon = load_tray_icon()?;
        let tray = TrayIconBuilder::new()
            .with_menu(Box::new(tray_menu))
            .with_tooltip("Desktop Clock")
            .with_icon(icon)
            .build()?;
        Ok(tray)
    }) {
        Ok(tray) => Some(tray),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "system tray unavailable; closing the window quits");
            None
        }
    };
    let has_tray = tray_icon.is_some();

    let menu_channel = MenuEvent::receiver();
    let tray_channel = TrayIconEvent::receiver();
    let toggle_id = toggle_item.id().clone();
    let check_id = check_item.id().clone();
    let install_id = install_item.id().clone();
    let quit_id = quit_item.id().clone();

    // Timer-based polling of tray events and update messages (runs in the main event loop)
    let ui_handle_tray = ui.as_weak();
    let coordinator_for_events = coordinator.clone();
    let update_timer_for_events = update_timer.clone();
    let mut install_enabled = false;
    let event_timer = slint::Timer::default();
    event_timer.start(slint::TimerMode::Repeated, EVENT_POLL_INTERVAL, move || {
        // Keep tray icon alive
        let _keep = &tray_icon;
        platform::pump_tray_events();

        while let Ok(message) = update_rx.try_recv() {
            let relaunched = message == UpdateMessage::Updater(UpdateEvent::Relaunched);
            coordinator_for_events.borrow_mut().handle(message);
            if relaunched {
                // Exit through the event loop: the tray icon and log guard must drop.
                shutdown(&update_timer_for_events);
            }
        }
        let deferred = coordinator_for_events.borrow().has_deferred_update();
        if deferred != install_enabled {
            install_enabled = deferred;
            install_item.set_enabled(deferred);
        }

        while let Ok(event) = menu_channel.try_recv() {
            if event.id == quit_id {
                let phase = coordinator_for_events.borrow().phase();
                tracing::debug!(update_phase = ?phase, "quit from tray");
                shutdown(&update_timer_for_events);
            } else if event.id == toggle_id {
                toggle_window(&ui_handle_tray);
            } else if event.id == check_id {
                coordinator_for_events.borrow_mut().request_check();
            } else if event.id == install_id {
                coordinator_for_events.borrow_mut().install_pending();
            }
        }

        while let Ok(event) = tray_channel.try_recv() {
            if let TrayIconEvent::Click {
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } = event
            {
                toggle_window(&ui_handle_tray);
            }
        }
    });

    // Close button hides to tray; without a tray there'd be no way back, so it quits
    let ui_handle_close = ui.as_weak();
    let update_timer_for_close = update_timer.clone();
    ui.on_close_app(move || {
        if !has_tray {
            shutdown(&update_timer_for_close);
        } else if let Some(ui) = ui_handle_close.upgrade() {
            hide_to_tray(&ui);
        }
    });

    // 8. DWM Transparency Fix
    slint::Timer::single_shot(Duration::from_millis(100), platform::extend_frame_into_client_area);

    ui.show()?;
    slint::run_event_loop_until_quit()?;

    update_timer.stop();
    clock_timer.stop();
    event_timer.stop();
    tracing::info!("desktop clock stopped");
    Ok(())
}
