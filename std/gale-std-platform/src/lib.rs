//!
//! gale-std-platform - Platform Services
//!
//! The historical backends duplicated one stub file per platform, each
//! forwarding trivial calls (mouse, calendar fields, dialogs, vibration,
//! browser/email launch) to the OS or windowing layer. This crate
//! consolidates them behind a single `PlatformServices` capability trait
//! with one implementation per backend.
//!
//! ## Backends
//!
//! - `HeadlessPlatform` - every windowing call is a no-op; clock and
//!   calendar fields stay real. Selected by the `headless` feature or
//!   `GALE_HEADLESS=1`.
//! - `DesktopPlatform` - adds browser/email launch via the OS opener
//!   (`xdg-open` / `open` / `cmd /C start`).
//!
//! An embedding host may install its own implementation before first use.
//!
//! ## Mouse Wheel State
//!
//! The wheel delta accumulates between frames and is consumed by a
//! read-and-reset `take`. It is owned by the platform session, not a bare
//! global; the per-frame `take` is the defined reset point.
//!

use std::process::Command;
use std::sync::{Mutex, OnceLock};

use chrono::{Datelike, Local, Timelike};
use gale_std_core::{GaleString, gale_string_from};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to launch {what}: {source}")]
    Launch {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

/// The capability set scripts may call into. Defaults are the common stub
/// bodies: real clock and calendar, everything windowing-specific a no-op.
pub trait PlatformServices: Send + Sync {
    fn system_millis(&self) -> i64 {
        Local::now().timestamp_millis()
    }

    fn year(&self) -> i64 {
        Local::now().year() as i64
    }

    /// 1-12
    fn month(&self) -> i64 {
        Local::now().month() as i64
    }

    /// 1-31
    fn day_of_month(&self) -> i64 {
        Local::now().day() as i64
    }

    /// 1-7, Sunday = 1
    fn day_of_week(&self) -> i64 {
        Local::now().weekday().number_from_sunday() as i64
    }

    fn hours(&self) -> i64 {
        Local::now().hour() as i64
    }

    fn minutes(&self) -> i64 {
        Local::now().minute() as i64
    }

    fn seconds(&self) -> i64 {
        Local::now().second() as i64
    }

    fn millis(&self) -> i64 {
        Local::now().timestamp_subsec_millis() as i64
    }

    fn set_mouse(&self, _x: i32, _y: i32) {}

    fn show_mouse(&self) {}

    fn hide_mouse(&self) {}

    fn show_keyboard(&self) {}

    fn show_alert(&self, _title: &str, _message: &str) {}

    /// Text entered through a platform input dialog; empty when the
    /// backend has none.
    fn input_string(&self) -> String {
        String::new()
    }

    fn launch_browser(&self, _url: &str) -> Result<(), PlatformError> {
        Ok(())
    }

    fn launch_email(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), PlatformError> {
        Ok(())
    }

    fn start_vibrate(&self, _millis: i64) {}

    fn stop_vibrate(&self) {}
}

/// The no-op backend used for servers, tests, and CI.
pub struct HeadlessPlatform;

impl PlatformServices for HeadlessPlatform {}

/// Desktop backend. Windowing calls stay no-ops (the host's window layer
/// handles them); URL and email launch go through the OS opener.
pub struct DesktopPlatform;

impl DesktopPlatform {
    fn open_with_system(&self, target: &str, what: &'static str) -> Result<(), PlatformError> {
        let result = {
            #[cfg(target_os = "linux")]
            {
                Command::new("xdg-open").arg(target).spawn()
            }
            #[cfg(target_os = "macos")]
            {
                Command::new("open").arg(target).spawn()
            }
            #[cfg(target_os = "windows")]
            {
                Command::new("cmd").args(["/C", "start", "", target]).spawn()
            }
            #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
            {
                let _ = target;
                return Err(PlatformError::Unsupported(what));
            }
        };
        result
            .map(|_| ())
            .map_err(|source| PlatformError::Launch { what, source })
    }
}

impl PlatformServices for DesktopPlatform {
    fn launch_browser(&self, url: &str) -> Result<(), PlatformError> {
        self.open_with_system(url, "browser")
    }

    fn launch_email(&self, to: &str, subject: &str, body: &str) -> Result<(), PlatformError> {
        let mailto = format!("mailto:{to}?subject={subject}&body={body}");
        self.open_with_system(&mailto, "email client")
    }
}

/// Accumulated mouse-wheel delta with a read-and-reset consumer.
#[derive(Default)]
pub struct WheelState {
    delta: Mutex<f64>,
}

impl WheelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from input callbacks as wheel events arrive.
    pub fn accumulate(&self, delta: f64) {
        *self.delta.lock().unwrap_or_else(|e| e.into_inner()) += delta;
    }

    /// Consume the delta accumulated since the previous take. Callers
    /// invoke this once per frame.
    pub fn take(&self) -> f64 {
        let mut delta = self.delta.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *delta)
    }
}

/// Process-wide platform state: the selected backend plus session-owned
/// input state.
pub struct PlatformSession {
    services: Box<dyn PlatformServices>,
    wheel: WheelState,
}

impl PlatformSession {
    pub fn services(&self) -> &dyn PlatformServices {
        self.services.as_ref()
    }

    pub fn wheel(&self) -> &WheelState {
        &self.wheel
    }
}

static SESSION: OnceLock<PlatformSession> = OnceLock::new();

fn default_services() -> Box<dyn PlatformServices> {
    let forced_headless = cfg!(feature = "headless")
        || matches!(
            std::env::var("GALE_HEADLESS").as_deref(),
            Ok("1") | Ok("true")
        );
    if forced_headless {
        Box::new(HeadlessPlatform)
    } else {
        Box::new(DesktopPlatform)
    }
}

/// Install a host-provided backend. Returns false when the session was
/// already initialized (the default had been selected, or install was
/// called twice).
pub fn install(services: Box<dyn PlatformServices>) -> bool {
    SESSION
        .set(PlatformSession {
            services,
            wheel: WheelState::new(),
        })
        .is_ok()
}

pub fn session() -> &'static PlatformSession {
    SESSION.get_or_init(|| PlatformSession {
        services: default_services(),
        wheel: WheelState::new(),
    })
}

unsafe fn str_arg<'a>(ptr: *const u8, len: usize) -> &'a str {
    if ptr.is_null() || len == 0 {
        return "";
    }
    unsafe {
        let slice = std::slice::from_raw_parts(ptr, len);
        std::str::from_utf8(slice).unwrap_or("")
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_system_millis() -> i64 {
    session().services().system_millis()
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_year() -> i64 {
    session().services().year()
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_month() -> i64 {
    session().services().month()
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_day_of_month() -> i64 {
    session().services().day_of_month()
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_day_of_week() -> i64 {
    session().services().day_of_week()
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_hours() -> i64 {
    session().services().hours()
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_minutes() -> i64 {
    session().services().minutes()
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_seconds() -> i64 {
    session().services().seconds()
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_millis() -> i64 {
    session().services().millis()
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_set_mouse(x: i32, y: i32) {
    session().services().set_mouse(x, y);
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_show_mouse() {
    session().services().show_mouse();
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_hide_mouse() {
    session().services().hide_mouse();
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_show_keyboard() {
    session().services().show_keyboard();
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_platform_show_alert(
    title: *const u8,
    title_len: usize,
    message: *const u8,
    message_len: usize,
) {
    let title = unsafe { str_arg(title, title_len) };
    let message = unsafe { str_arg(message, message_len) };
    session().services().show_alert(title, message);
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_input_string() -> *mut GaleString {
    gale_string_from(&session().services().input_string())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_platform_launch_browser(url: *const u8, url_len: usize) -> i64 {
    let url = unsafe { str_arg(url, url_len) };
    match session().services().launch_browser(url) {
        Ok(()) => 1,
        Err(err) => {
            warn!("launch_browser failed: {err}");
            0
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_platform_launch_email(
    to: *const u8,
    to_len: usize,
    subject: *const u8,
    subject_len: usize,
    body: *const u8,
    body_len: usize,
) -> i64 {
    let to = unsafe { str_arg(to, to_len) };
    let subject = unsafe { str_arg(subject, subject_len) };
    let body = unsafe { str_arg(body, body_len) };
    match session().services().launch_email(to, subject, body) {
        Ok(()) => 1,
        Err(err) => {
            warn!("launch_email failed: {err}");
            0
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_start_vibrate(millis: i64) {
    session().services().start_vibrate(millis);
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_stop_vibrate() {
    session().services().stop_vibrate();
}

/// Consume the wheel delta accumulated since the previous call.
#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_mouse_wheel() -> f64 {
    session().wheel().take()
}

/// Called by the host's input layer as wheel events arrive.
#[unsafe(no_mangle)]
pub extern "C" fn gale_platform_mouse_wheel_add(delta: f64) {
    session().wheel().accumulate(delta);
}

#[cfg(test)]
mod tests {
    use super::*;
    use gale_std_core::gale_string_decref;

    #[test]
    fn test_calendar_fields_in_range() {
        let platform = HeadlessPlatform;
        assert!(platform.year() >= 2024);
        assert!((1..=12).contains(&platform.month()));
        assert!((1..=31).contains(&platform.day_of_month()));
        assert!((1..=7).contains(&platform.day_of_week()));
        assert!((0..24).contains(&platform.hours()));
        assert!((0..60).contains(&platform.minutes()));
        assert!((0..61).contains(&platform.seconds()));
        assert!((0..1000).contains(&platform.millis()));
    }

    #[test]
    fn test_system_millis_advances() {
        let platform = HeadlessPlatform;
        let first = platform.system_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = platform.system_millis();
        assert!(second >= first);
        assert!(first > 1_500_000_000_000); // sanity: after 2017
    }

    #[test]
    fn test_headless_stubs_are_noops() {
        let platform = HeadlessPlatform;
        platform.set_mouse(10, 20);
        platform.show_mouse();
        platform.hide_mouse();
        platform.show_keyboard();
        platform.show_alert("title", "message");
        platform.start_vibrate(100);
        platform.stop_vibrate();
        assert_eq!(platform.input_string(), "");
        assert!(platform.launch_browser("https://example.com").is_ok());
        assert!(platform.launch_email("a@b.c", "hi", "text").is_ok());
    }

    #[test]
    fn test_wheel_accumulate_and_take() {
        let wheel = WheelState::new();
        wheel.accumulate(1.5);
        wheel.accumulate(2.5);
        assert_eq!(wheel.take(), 4.0);
        // take resets; nothing new arrived
        assert_eq!(wheel.take(), 0.0);
        wheel.accumulate(-1.0);
        assert_eq!(wheel.take(), -1.0);
    }

    #[test]
    fn test_wheel_ffi_roundtrip() {
        // drain anything a previous test left behind
        let _ = gale_platform_mouse_wheel();
        gale_platform_mouse_wheel_add(3.0);
        gale_platform_mouse_wheel_add(0.5);
        assert_eq!(gale_platform_mouse_wheel(), 3.5);
        assert_eq!(gale_platform_mouse_wheel(), 0.0);
    }

    #[test]
    fn test_input_string_ffi_returns_heap_string() {
        let s = gale_platform_input_string();
        assert!(!s.is_null());
        unsafe {
            assert_eq!((*s).as_str(), "");
            gale_string_decref(s);
        }
    }

    #[test]
    fn test_clock_ffi_in_range() {
        assert!((1..=12).contains(&gale_platform_month()));
        assert!((1..=7).contains(&gale_platform_day_of_week()));
        assert!(gale_platform_system_millis() > 1_500_000_000_000);
    }
}
