//! The ssh transport under the scp protocol.
//!
//! One [`SshSession`] per peer: TCP connect with a caller-supplied
//! timeout, handshake, host-key verification through a callback, then
//! password and/or private-key auth. Each transfer runs the remote scp
//! in source or sink mode over an exec channel.

use crate::scp::{self, Result, ScpError, ScpFile};
use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};
use ssh2::{HostKeyType, Session};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Connection parameters for one peer.
#[derive(Debug, Clone)]
pub struct SshConfig<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub password: Option<&'a str>,
    /// PEM-encoded private key material.
    pub private_key: Option<&'a str>,
    pub timeout: Duration,
}

/// The host key a server presented during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    pub hostname: String,
    pub remote_addr: String,
    pub key_type: String,
    /// Lowercase hex sha256 of the raw key blob.
    pub sha256: String,
}

impl HostKey {
    /// The known_hosts line format:
    /// `<hostname> <remote-addr> <key-type> <hex-sha256>`.
    pub fn line(&self) -> String {
        format!(
            "{} {} {} {}",
            self.hostname, self.remote_addr, self.key_type, self.sha256
        )
    }

    /// Colon-separated hex pairs for display to the user.
    pub fn fingerprint(&self) -> String {
        self.sha256
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// An authenticated ssh session ready to run scp transfers.
pub struct SshSession {
    session: Session,
}

impl SshSession {
    /// Connect and authenticate.
    ///
    /// `verify` sees the server's host key before authentication; an
    /// error return drops the connection unused.
    pub fn connect(
        config: &SshConfig<'_>,
        verify: &mut dyn FnMut(&HostKey) -> Result<()>,
    ) -> Result<Self> {
        let addr = (config.host, config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ScpError::Ssh(format!("cannot resolve host {:?}", config.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, config.timeout)?;
        let remote_addr = tcp
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());

        let mut session = Session::new()?;
        session.set_timeout(config.timeout.as_millis().min(u32::MAX as u128) as u32);
        session.set_tcp_stream(tcp);
        session.handshake()?;

        let (key_blob, key_type) = session
            .host_key()
            .ok_or_else(|| ScpError::Ssh("server presented no host key".into()))?;
        let host_key = HostKey {
            hostname: config.host.to_string(),
            remote_addr,
            key_type: key_type_name(key_type).to_string(),
            sha256: HEXLOWER.encode(&Sha256::digest(key_blob)),
        };
        verify(&host_key)?;

        if let Some(password) = config.password {
            session.userauth_password(config.user, password)?;
        } else if let Some(private_key) = config.private_key {
            session.userauth_pubkey_memory(config.user, None, private_key, None)?;
        }
        if !session.authenticated() {
            return Err(ScpError::Ssh("authentication failed".into()));
        }

        Ok(Self { session })
    }

    /// Download `path` via `scp -qf`.
    pub fn recv(&self, path: &str) -> Result<ScpFile> {
        check_path(path)?;
        let mut channel = self.session.channel_session()?;
        channel.exec(&format!("scp -qf {path}"))?;

        let result = scp::recv(&mut channel);

        let _ = channel.send_eof();
        let _ = channel.close();
        let _ = channel.wait_close();
        result
    }

    /// Upload to `path` via `scp -qt`.
    pub fn send(&self, path: &str, mode: i32, contents: &[u8]) -> Result<()> {
        check_path(path)?;
        let name = path.rsplit('/').next().unwrap_or(path);

        let mut channel = self.session.channel_session()?;
        channel.exec(&format!("scp -qt {path}"))?;

        let result = scp::send(&mut channel, name, mode, contents);

        let _ = channel.send_eof();
        let _ = channel.close();
        let _ = channel.wait_close();
        result
    }
}

// Protocol limitation, checked before anything hits the wire.
fn check_path(path: &str) -> Result<()> {
    if path.is_empty() || path.contains(char::is_whitespace) {
        return Err(ScpError::Protocol(format!(
            "remote path {path:?} cannot be expressed in scp"
        )));
    }
    Ok(())
}

fn key_type_name(key_type: HostKeyType) -> &'static str {
    match key_type {
        HostKeyType::Rsa => "ssh-rsa",
        HostKeyType::Dss => "ssh-dss",
        HostKeyType::Ecdsa256 => "ecdsa-sha2-nistp256",
        HostKeyType::Ecdsa384 => "ecdsa-sha2-nistp384",
        HostKeyType::Ecdsa521 => "ecdsa-sha2-nistp521",
        HostKeyType::Ed25519 => "ssh-ed25519",
        HostKeyType::Unknown => "unknown",
    }
}
