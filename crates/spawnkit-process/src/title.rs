//! OS-visible process title.

/// Linux caps the thread name at 15 bytes plus the terminator.
#[cfg(target_os = "linux")]
const MAX_TITLE_BYTES: usize = 15;

/// Set the OS-visible title of the running image.
///
/// One `prctl(PR_SET_NAME)` call on Linux; a no-op elsewhere. The name is
/// truncated to the kernel limit and stripped of interior NULs.
#[cfg(target_os = "linux")]
pub fn set_process_title(name: &str) -> std::io::Result<()> {
    let mut bytes: Vec<u8> = name.bytes().filter(|&b| b != 0).collect();
    bytes.truncate(MAX_TITLE_BYTES);
    let title = std::ffi::CString::new(bytes).expect("NUL bytes stripped");

    nix::sys::prctl::set_name(&title).map_err(std::io::Error::from)
}

#[cfg(not(target_os = "linux"))]
pub fn set_process_title(_name: &str) -> std::io::Result<()> {
    Ok(())
}
