//! Host user identity mirrored into the container.

use crate::error::{CoreError, Result};
use std::process::Stdio;
use tokio::process::Command;

/// User, group and host the container session impersonates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Login name.
    pub user: String,
    /// Numeric user id.
    pub uid: u32,
    /// Primary group name.
    pub group: String,
    /// Numeric primary group id.
    pub gid: u32,
    /// Host name of the invoking machine.
    pub hostname: String,
}

impl Identity {
    /// Detect the identity of the current process.
    ///
    /// Names are resolved through `id(1)` so that NSS sources (LDAP and the
    /// like) are honored; numeric ids and the host name come from libc.
    pub async fn detect() -> Result<Self> {
        let (uid, gid) = ids();
        let user = id_name("-u").await?;
        let group = id_name("-g").await?;
        let hostname = hostname()?;
        tracing::debug!(%user, uid, %group, gid, %hostname, "Detected host identity");
        Ok(Self {
            user,
            uid,
            group,
            gid,
            hostname,
        })
    }
}

#[cfg(unix)]
fn ids() -> (u32, u32) {
    // SAFETY: getuid() and getgid() are simple POSIX getters that always succeed and have no side effects.
    unsafe { (libc::getuid(), libc::getgid()) }
}

#[cfg(not(unix))]
fn ids() -> (u32, u32) {
    (0, 0)
}

/// Run `id <flag> -n` and return the trimmed name.
async fn id_name(flag: &str) -> Result<String> {
    let what = if flag == "-u" { "user" } else { "group" };
    let out = Command::new("id")
        .args([flag, "-n"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| CoreError::Config(format!("failed to determine {what} name: {e}")))?;
    if !out.status.success() {
        return Err(CoreError::Config(format!(
            "failed to determine {what} name: id exited with {}",
            out.status
        )));
    }
    let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if name.is_empty() {
        return Err(CoreError::Config(format!("failed to determine {what} name")));
    }
    Ok(name)
}

#[cfg(unix)]
fn hostname() -> Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is a valid writable buffer of the given length; gethostname
    // writes at most that many bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

#[cfg(not(unix))]
fn hostname() -> Result<String> {
    Ok(std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string()))
}
