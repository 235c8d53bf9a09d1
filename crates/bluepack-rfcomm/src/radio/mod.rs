//! Platform selection for the RFCOMM radio

#[cfg(not(target_os = "linux"))]
mod fallback;
#[cfg(target_os = "linux")]
mod linux;

#[cfg(not(target_os = "linux"))]
pub use fallback::RfcommRadio;
#[cfg(target_os = "linux")]
pub use linux::RfcommRadio;
