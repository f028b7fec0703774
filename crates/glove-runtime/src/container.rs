use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::Path;

const INIT_PROCESS_CGROUP_PATH: &str = "/proc/1/cgroup";

/// Best-effort detection of a containerized environment based on the cgroup
/// of the init process. A missing cgroup file means "not a container".
pub fn is_container() -> io::Result<bool> {
    detect(Path::new(INIT_PROCESS_CGROUP_PATH))
}

fn detect(path: &Path) -> io::Result<bool> {
    let mut buffer = [0_u8; 8];
    let read = match read_prefix(path, &mut buffer) {
        Ok(read) => read,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(false),
        Err(error) => return Err(error),
    };

    if read == 0 {
        return Ok(false);
    }

    let prefix = &buffer[..read];
    Ok(prefix.starts_with(b"docker") || prefix.starts_with(b"lxc"))
}

fn read_prefix(path: &Path, buffer: &mut [u8]) -> io::Result<usize> {
    let mut file = File::open(path)?;
    file.read(buffer)
}

#[cfg(test)]
mod tests {
    use super::detect;
    use std::io::Write;
    use std::path::Path;

    fn write_temp(name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("glove-cgroup-{}-{name}", std::process::id()));
        let mut file = std::fs::File::create(&path).expect("create temp file");
        file.write_all(content).expect("write temp file");
        path
    }

    #[test]
    fn detects_docker_cgroup() {
        let path = write_temp("docker", b"docker/3f1c");
        assert!(detect(&path).expect("detect"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn detects_lxc_cgroup() {
        let path = write_temp("lxc", b"lxc/payload");
        assert!(detect(&path).expect("detect"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn host_cgroup_is_not_a_container() {
        let path = write_temp("host", b"0::/init.scope");
        assert!(!detect(&path).expect("detect"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_is_not_a_container() {
        assert!(!detect(Path::new("/glove-no-such-cgroup-file")).expect("detect"));
    }

    #[test]
    fn empty_file_is_not_a_container() {
        let path = write_temp("empty", b"");
        assert!(!detect(&path).expect("detect"));
        std::fs::remove_file(path).ok();
    }
}
