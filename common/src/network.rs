use std::net::Ipv4Addr;

use log::{info, warn};
use thiserror::Error;

use crate::{config::NetworkTimings, types::NetworkMode};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential record '{key}' could not be written: {reason}")]
    Write { key: &'static str, reason: String },
    #[error("credential record '{key}' could not be read: {reason}")]
    Read { key: &'static str, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("{field} '{value}' is not a valid IPv4 address")]
    MalformedAddress { field: &'static str, value: String },
    #[error("station configuration rejected: {0}")]
    Configure(String),
    #[error("join request failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKey {
    Ssid,
    Passphrase,
    StaticIp,
    Gateway,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 4] = [
        CredentialKey::Ssid,
        CredentialKey::Passphrase,
        CredentialKey::StaticIp,
        CredentialKey::Gateway,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ssid => "ssid",
            Self::Passphrase => "pass",
            Self::StaticIp => "ip",
            Self::Gateway => "gateway",
        }
    }

    pub fn from_field(field: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == field)
    }
}

pub trait CredentialStore {
    fn load(&self, key: CredentialKey) -> String;
    fn save(&mut self, key: CredentialKey, value: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkCredentials {
    pub ssid: String,
    pub passphrase: String,
    pub static_ip: String,
    pub gateway: String,
}

impl NetworkCredentials {
    pub fn load<S: CredentialStore + ?Sized>(store: &S) -> Self {
        Self {
            ssid: store.load(CredentialKey::Ssid),
            passphrase: store.load(CredentialKey::Passphrase),
            static_ip: store.load(CredentialKey::StaticIp),
            gateway: store.load(CredentialKey::Gateway),
        }
    }

    pub fn field_mut(&mut self, key: CredentialKey) -> &mut String {
        match key {
            CredentialKey::Ssid => &mut self.ssid,
            CredentialKey::Passphrase => &mut self.passphrase,
            CredentialKey::StaticIp => &mut self.static_ip,
            CredentialKey::Gateway => &mut self.gateway,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.ssid.is_empty() && !self.static_ip.is_empty()
    }
}

pub fn parse_ipv4(field: &'static str, value: &str) -> Result<Ipv4Addr, NetworkError> {
    let trimmed = value.trim();
    if trimmed.is_empty() && field == CredentialKey::Gateway.as_str() {
        return Ok(Ipv4Addr::UNSPECIFIED);
    }
    trimmed
        .parse()
        .map_err(|_| NetworkError::MalformedAddress {
            field,
            value: value.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticIpConfig {
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
}

impl StaticIpConfig {
    pub fn from_credentials(
        credentials: &NetworkCredentials,
        subnet_mask: Ipv4Addr,
    ) -> Result<Self, NetworkError> {
        Ok(Self {
            ip: parse_ipv4(CredentialKey::StaticIp.as_str(), &credentials.static_ip)?,
            gateway: parse_ipv4(CredentialKey::Gateway.as_str(), &credentials.gateway)?,
            subnet_mask,
        })
    }

    pub fn prefix_len(&self) -> u8 {
        u32::from(self.subnet_mask).leading_ones() as u8
    }
}

pub trait StationLink {
    fn configure(&mut self, addressing: &StaticIpConfig) -> Result<(), NetworkError>;
    fn begin(&mut self, ssid: &str, passphrase: &str) -> Result<(), NetworkError>;
    fn is_connected(&mut self) -> bool;
}

pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&mut self, ms: u64);
}

#[derive(Debug, Clone)]
pub struct ModeResolver {
    timings: NetworkTimings,
}

impl ModeResolver {
    pub fn new(timings: NetworkTimings) -> Self {
        Self { timings }
    }

    pub fn resolve<L, C>(
        &self,
        credentials: &NetworkCredentials,
        link: &mut L,
        clock: &mut C,
    ) -> NetworkMode
    where
        L: StationLink + ?Sized,
        C: Clock + ?Sized,
    {
        if !credentials.is_complete() {
            info!("undefined SSID or IP address, starting provisioning portal");
            return NetworkMode::Provisioning;
        }

        match self.try_join(credentials, link, clock) {
            Ok(()) => {
                info!(
                    "joined '{}' as {}",
                    credentials.ssid, credentials.static_ip
                );
                NetworkMode::Managed
            }
            Err(err) => {
                warn!("station join failed: {err}; starting provisioning portal");
                NetworkMode::Provisioning
            }
        }
    }

    fn try_join<L, C>(
        &self,
        credentials: &NetworkCredentials,
        link: &mut L,
        clock: &mut C,
    ) -> Result<(), NetworkError>
    where
        L: StationLink + ?Sized,
        C: Clock + ?Sized,
    {
        let addressing =
            StaticIpConfig::from_credentials(credentials, self.timings.subnet_mask)?;
        link.configure(&addressing)?;
        link.begin(&credentials.ssid, &credentials.passphrase)?;

        let started = clock.now_ms();
        loop {
            if link.is_connected() {
                return Ok(());
            }
            let elapsed = clock.now_ms().saturating_sub(started);
            if elapsed >= self.timings.join_timeout_ms {
                return Err(NetworkError::Join(format!(
                    "not connected after {} ms",
                    self.timings.join_timeout_ms
                )));
            }
            let remaining = self.timings.join_timeout_ms - elapsed;
            clock.sleep_ms(self.timings.join_poll_interval_ms.min(remaining));
        }
    }
}
