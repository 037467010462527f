use log::{info, warn};

use crate::network::{CredentialKey, CredentialStore, NetworkCredentials};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningSubmission {
    pub fields: Vec<(CredentialKey, String)>,
}

impl ProvisioningSubmission {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let fields = pairs
            .into_iter()
            .filter_map(|(name, value)| {
                CredentialKey::from_field(name.as_ref()).map(|key| (key, value.into()))
            })
            .collect();
        Self { fields }
    }

    pub fn from_form_body(body: &str) -> Self {
        Self::from_pairs(parse_form_urlencoded(body))
    }

    pub fn get(&self, key: CredentialKey) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(field, _)| *field == key)
            .map(|(_, value)| value.as_str())
    }
}

pub fn apply_submission<S: CredentialStore + ?Sized>(
    store: &mut S,
    submission: &ProvisioningSubmission,
    credentials: &mut NetworkCredentials,
) -> String {
    for (key, value) in &submission.fields {
        match key {
            CredentialKey::Passphrase => info!("{} set", key.as_str()),
            _ => info!("{} set to: {}", key.as_str(), value),
        }
        if let Err(err) = store.save(*key, value) {
            warn!("{err}");
        }
        *credentials.field_mut(*key) = value.clone();
    }

    acknowledgement(&credentials.static_ip)
}

pub fn acknowledgement(ip: &str) -> String {
    format!("Done. ESP will restart, connect to your router and go to IP address: {ip}")
}

pub fn parse_form_urlencoded(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (percent_decode(name), percent_decode(value)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
