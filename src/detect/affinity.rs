use crate::detect::error::DetectorError;

/// Pin the calling thread to `cores`. An empty list leaves the thread alone.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cores: &[usize]) -> Result<(), DetectorError> {
    if cores.is_empty() {
        return Ok(());
    }
    let max = libc::CPU_SETSIZE as usize;
    if let Some(core) = cores.iter().find(|core| **core >= max) {
        return Err(DetectorError::Affinity(format!(
            "core {} outside cpu set (max {})",
            core,
            max - 1
        )));
    }

    // SAFETY: cpu_set_t is plain data; zeroed is the empty set and every
    // index passed to CPU_SET was bounds-checked above.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for core in cores {
            libc::CPU_SET(*core, &mut set);
        }
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        return Err(DetectorError::Affinity(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(cores: &[usize]) -> Result<(), DetectorError> {
    if !cores.is_empty() {
        log::debug!("Affinity: not supported on this platform, ignoring {:?}", cores);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_core_list_is_a_no_op() {
        assert!(pin_current_thread(&[]).is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn out_of_range_core_is_rejected() {
        assert!(matches!(
            pin_current_thread(&[usize::MAX]),
            Err(DetectorError::Affinity(_))
        ));
    }
}
