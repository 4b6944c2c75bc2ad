//! OS-specific bits of the shell. Everything here is best-effort.

/// Trim our own working set to minimize memory while hidden in the tray.
#[cfg(windows)]
pub fn trim_own_memory() {
    use windows::Win32::System::ProcessStatus::EmptyWorkingSet;
    use windows::Win32::System::Threading::GetCurrentProcess;

    unsafe {
        let _ = EmptyWorkingSet(GetCurrentProcess());
    }
}

#[cfg(not(windows))]
pub fn trim_own_memory() {}

/// Extends the DWM frame over the client area so the frameless window's
/// transparent corners render as transparent instead of black.
#[cfg(windows)]
pub fn extend_frame_into_client_area() {
    use windows::Win32::Graphics::Dwm::DwmExtendFrameIntoClientArea;
    use windows::Win32::UI::Controls::MARGINS;
    use windows::Win32::UI::WindowsAndMessaging::GetForegroundWindow;

    unsafe {
        let hwnd = GetForegroundWindow();
        // Focus may already have moved to another application.
        if !belongs_to_current_process(hwnd) {
            tracing::debug!("foreground window is not ours; skipping DWM frame extension");
            return;
        }
        let margins = MARGINS {
            cxLeftWidth: -1,
            cxRightWidth: -1,
            cyTopHeight: -1,
            cyBottomHeight: -1,
        };
        if let Err(err) = DwmExtendFrameIntoClientArea(hwnd, &margins) {
            tracing::debug!(error = %err, "DwmExtendFrameIntoClientArea failed");
        }
    }
}

#[cfg(windows)]
fn belongs_to_current_process(hwnd: windows::Win32::Foundation::HWND) -> bool {
    use windows::Win32::System::Threading::GetCurrentProcessId;
    use windows::Win32::UI::WindowsAndMessaging::GetWindowThreadProcessId;

    if hwnd.0.is_null() {
        return false;
    }
    let mut owner = 0u32;
    unsafe {
        GetWindowThreadProcessId(hwnd, Some(&mut owner as *mut u32));
        owner != 0 && owner == GetCurrentProcessId()
    }
}

#[cfg(not(windows))]
pub fn extend_frame_into_client_area() {}

/// tray-icon on Linux is GTK based; GTK must be initialized on the UI thread
/// before the tray is built.
#[cfg(target_os = "linux")]
pub fn init_tray_support() -> anyhow::Result<()> {
    gtk::init().map_err(|err| anyhow::anyhow!("failed to initialize GTK: {err}"))
}

#[cfg(not(target_os = "linux"))]
pub fn init_tray_support() -> anyhow::Result<()> {
    Ok(())
}

/// slint's winit loop doesn't drive GTK, so pending GTK events are drained
/// from the shell's polling timer.
#[cfg(target_os = "linux")]
pub fn pump_tray_events() {
    while gtk::events_pending() {
        gtk::main_iteration_do(false);
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pump_tray_events() {}
