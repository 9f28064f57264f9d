// Copyright 2025-2026 CEMAXECUTER LLC

//! Markup strings: device addresses and subdevice routing specs.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SdrError};

/// Parsed device address: an ordered list of `key=value` pairs.
///
/// Accepts UHD markup (`"serial=31A5,type=b200"`) and the
/// `usrp-PRODUCT-SERIAL` interface names printed by device discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceAddr {
    pairs: Vec<(String, String)>,
}

impl DeviceAddr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace `key`.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some(pair) => pair.1 = value.to_string(),
            None => self.pairs.push((key.to_string(), value.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Numeric value of `key`, if present.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v.parse().map(Some).map_err(|_| {
                SdrError::config(format!("invalid value for '{}': '{}'", key, v))
            }),
        }
    }

    /// The simulated backend is selected with `type=sim`.
    pub fn is_sim(&self) -> bool {
        self.get("type") == Some("sim")
    }
}

/// Split an interface string like "usrp-B210-SERIAL" into (product, serial)
fn parse_iface(iface: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = iface.splitn(3, '-').collect();
    if parts.len() == 3 && parts[0] == "usrp" && !parts[2].is_empty() {
        Some((parts[1].to_string(), parts[2].to_string()))
    } else {
        None
    }
}

impl FromStr for DeviceAddr {
    type Err = SdrError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let mut addr = DeviceAddr::new();
        if s.is_empty() {
            return Ok(addr);
        }

        if !s.contains('=') {
            if let Some((product, serial)) = parse_iface(s) {
                addr.set("serial", &serial);
                addr.set("product", &product);
                return Ok(addr);
            }
        }

        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, val) = part.split_once('=').unwrap_or((part, ""));
            let key = key.trim();
            if key.is_empty() {
                return Err(SdrError::config(format!(
                    "malformed device address '{}': empty key",
                    s
                )));
            }
            addr.set(key, val.trim());
        }

        Ok(addr)
    }
}

impl fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .pairs
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// One logical channel's route: daughterboard slot and front-end on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdevPair {
    pub db_name: String,
    pub sd_name: String,
}

/// Subdevice routing: entry `i` says which front-end feeds channel `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubdevSpec {
    pairs: Vec<SubdevPair>,
}

impl SubdevSpec {
    pub fn pairs(&self) -> &[SubdevPair] {
        &self.pairs
    }

    /// Number of channels this spec maps.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromStr for SubdevSpec {
    type Err = SdrError;

    /// Parse markup like `"A:0 B:0"`; a bare slot name (`"A"`) means its default front-end.
    fn from_str(s: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for tok in s.split_whitespace() {
            let mut fields = tok.split(':');
            let db = fields.next().unwrap_or("");
            let sd = fields.next().unwrap_or("");
            if db.is_empty() || fields.next().is_some() {
                return Err(SdrError::config(format!(
                    "malformed subdev spec entry '{}' in '{}'",
                    tok, s
                )));
            }
            pairs.push(SubdevPair {
                db_name: db.to_string(),
                sd_name: sd.to_string(),
            });
        }
        if pairs.is_empty() {
            return Err(SdrError::config("empty subdev spec"));
        }
        Ok(Self { pairs })
    }
}

impl fmt::Display for SubdevSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .pairs
            .iter()
            .map(|p| {
                if p.sd_name.is_empty() {
                    p.db_name.clone()
                } else {
                    format!("{}:{}", p.db_name, p.sd_name)
                }
            })
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_addr_markup() {
        let addr: DeviceAddr = "serial=31A5, type=b200,num_recv_frames=1024".parse().unwrap();
        assert_eq!(addr.get("serial"), Some("31A5"));
        assert_eq!(addr.get("type"), Some("b200"));
        assert_eq!(addr.get_parsed::<usize>("num_recv_frames").unwrap(), Some(1024));
        assert_eq!(addr.to_string(), "serial=31A5,type=b200,num_recv_frames=1024");
    }

    #[test]
    fn test_device_addr_iface_name() {
        let addr: DeviceAddr = "usrp-B210-3123ABC".parse().unwrap();
        assert_eq!(addr.get("serial"), Some("3123ABC"));
        assert_eq!(addr.get("product"), Some("B210"));
        assert!(!addr.is_sim());
    }

    #[test]
    fn test_device_addr_rejects_empty_key() {
        assert!("=foo".parse::<DeviceAddr>().is_err());
        assert!("type=sim".parse::<DeviceAddr>().unwrap().is_sim());
        assert!("".parse::<DeviceAddr>().unwrap().is_empty());
    }

    #[test]
    fn test_device_addr_bad_number() {
        let addr: DeviceAddr = "mcr=fast".parse().unwrap();
        assert!(addr.get_parsed::<f64>("mcr").is_err());
    }

    #[test]
    fn test_subdev_spec_parse() {
        let spec: SubdevSpec = "A:A A:B".parse().unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.pairs()[1].sd_name, "B");
        assert_eq!(spec.to_string(), "A:A A:B");

        let bare: SubdevSpec = "A".parse().unwrap();
        assert_eq!(bare.pairs()[0].sd_name, "");
    }

    #[test]
    fn test_subdev_spec_malformed() {
        assert!("A:0:1".parse::<SubdevSpec>().is_err());
        assert!(":0".parse::<SubdevSpec>().is_err());
        assert!("   ".parse::<SubdevSpec>().is_err());
    }
}
