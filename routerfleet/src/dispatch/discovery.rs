//! Finding routers in an address range and reading their identity.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, info, trace};
use serde::Serialize;
use serde_json::{Map, Value};

use super::input::split_items;
use super::outcome::{Outcome, TargetIdentity, TargetOutcome};
use super::pool::fan_out;
use super::read::{parse_expressions, read_target};
use super::Fleet;
use crate::classify::{truncate, Failure, FailureKind, Payload};
use crate::config::ConcurrencyProfile;
use crate::error::{DispatchError, Result};
use crate::path::PathExpression;
use crate::target::Target;
use crate::transport::{ApiRequest, DeviceApi, FileTransfer};

const PRODUCT_INFO_PATH: &str = "status/product_info";
const SYSTEM_ID_PATH: &str = "config/system/system_id";
const FW_INFO_PATH: &str = "status/fw_info";

/// One target's identity plus the path cells read after it.
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub info: TargetOutcome<RouterInfo>,
    /// Keyed by column. Empty when the identity could not be read.
    pub cells: IndexMap<String, Value>,
}

/// Identity of one router as reported by its API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterInfo {
    /// `system_id`, or a name derived from product and MAC.
    pub hostname: String,
    /// Upper-case hex digits, no separators.
    pub mac_address: String,
    pub serial_number: String,
    pub product_name: String,
    pub ncos_version: String,
}

impl RouterInfo {
    /// Build from the `product_info` document plus the optional
    /// `system_id` and `fw_info` answers.
    pub fn from_documents(product: &Map<String, Value>, system_id: &str, firmware: Option<&Map<String, Value>>) -> Self {
        let mac_raw = first_text(product, &["mac0", "mac"]);
        let mac_address: String = mac_raw
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect::<String>()
            .to_uppercase();

        let serial_number = match product.get("manufacturing") {
            Some(Value::Object(manufacturing)) => first_text(manufacturing, &["serial_num", "serial_number"]),
            _ => String::new(),
        };
        let serial_number = if serial_number.is_empty() {
            first_text(product, &["serial_num", "serial_number"])
        } else {
            serial_number
        };

        let product_name = first_text(product, &["product_name"]);
        let ncos_version = firmware.map(firmware_version).unwrap_or_default();

        let system_id = system_id.trim();
        let hostname = if !system_id.is_empty() {
            system_id.to_string()
        } else {
            let prefix = product_name.split('-').next().unwrap_or("").trim();
            let suffix: String = {
                let chars: Vec<char> = mac_address.chars().collect();
                chars[chars.len().saturating_sub(3)..].iter().collect()
            };
            if prefix.is_empty() && suffix.is_empty() {
                String::new()
            } else {
                format!("{}-{}", prefix, suffix)
            }
        };

        Self {
            hostname,
            mac_address,
            serial_number,
            product_name,
            ncos_version,
        }
    }

    /// Whether the device said anything about itself.
    pub fn is_identified(&self) -> bool {
        !self.hostname.is_empty() || !self.mac_address.is_empty() || !self.product_name.is_empty()
    }
}

/// One address probed by [`Fleet::discover`].
#[derive(Debug, Clone)]
pub struct Discovered {
    /// Ready-to-use target; the display name is the discovered hostname.
    pub target: Target,
    pub outcome: Outcome<RouterInfo>,
}

impl Discovered {
    /// Check if a router answered at this address.
    pub fn is_online(&self) -> bool {
        self.outcome.success().is_some_and(RouterInfo::is_identified)
    }
}

/// Expand an address range description into distinct addresses.
///
/// Items are separated by commas or whitespace. Each item is an IPv4 CIDR
/// block (host addresses only), `a.b.c.d-e`, `a.b.c.d-a.b.c.e` or a single
/// IPv4/IPv6 address. Reversed bounds are swapped and unparsable items are
/// ignored. The result is sorted numerically.
///
/// ```rust
/// use routerfleet::dispatch::expand_address_range;
///
/// let addresses = expand_address_range("10.0.0.3-1, 10.0.0.2", 512).unwrap();
/// assert_eq!(addresses.len(), 3);
/// assert_eq!(addresses[0].to_string(), "10.0.0.1");
/// ```
pub fn expand_address_range(spec: &str, max: usize) -> Result<Vec<IpAddr>> {
    let mut addresses = BTreeSet::new();

    for item in split_items(spec) {
        let (start, end) = match parse_item(item) {
            Some(RangeItem::V4(start, end)) => (start, end),
            Some(RangeItem::V6(address)) => {
                addresses.insert(IpAddr::V6(address));
                continue;
            }
            None => {
                trace!("ignoring address item {:?}", item);
                continue;
            }
        };
        let count = (end - start) as usize + 1;
        if count > max {
            return Err(DispatchError::TooManyAddresses { count, max }.into());
        }
        addresses.extend((start..=end).map(|n| IpAddr::V4(Ipv4Addr::from(n))));
        if addresses.len() > max {
            return Err(DispatchError::TooManyAddresses {
                count: addresses.len(),
                max,
            }
            .into());
        }
    }

    if addresses.is_empty() {
        return Err(DispatchError::NoAddresses {
            spec: spec.trim().to_string(),
        }
        .into());
    }
    Ok(addresses.into_iter().collect())
}

enum RangeItem {
    /// Inclusive numeric bounds.
    V4(u32, u32),
    V6(Ipv6Addr),
}

fn parse_item(item: &str) -> Option<RangeItem> {
    if let Some((network, prefix)) = item.split_once('/') {
        let network = u32::from(network.parse::<Ipv4Addr>().ok()?);
        let prefix: u32 = prefix.parse().ok()?;
        if prefix > 32 {
            return None;
        }
        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        let first = network & mask;
        let last = first | !mask;
        return Some(match prefix {
            31 | 32 => RangeItem::V4(first, last),
            _ => RangeItem::V4(first + 1, last - 1),
        });
    }

    if let Some((start, end)) = item.split_once('-') {
        let start = start.parse::<Ipv4Addr>().ok()?;
        let end = if end.contains('.') {
            end.parse::<Ipv4Addr>().ok()?
        } else {
            let [a, b, c, _] = start.octets();
            Ipv4Addr::new(a, b, c, end.parse().ok()?)
        };
        let (start, end) = (u32::from(start), u32::from(end));
        return Some(RangeItem::V4(start.min(end), start.max(end)));
    }

    match item.parse::<IpAddr>().ok()? {
        IpAddr::V4(address) => Some(RangeItem::V4(u32::from(address), u32::from(address))),
        IpAddr::V6(address) => Some(RangeItem::V6(address)),
    }
}

/// Read a router's identity.
///
/// `status/product_info` is tried up to `1 + retries` times and must answer
/// with a JSON object; `system_id` and `fw_info` are best effort.
pub async fn fetch_router_info<A: DeviceApi>(
    api: &A,
    target: &Target,
    timeout: Duration,
    retries: u32,
) -> std::result::Result<RouterInfo, Failure> {
    let request = ApiRequest::get(PRODUCT_INFO_PATH, timeout);
    let mut last_failure = Failure::new(FailureKind::MalformedResponse, "no product info");
    let mut product = None;

    for attempt in 0..=retries {
        match api.call(target, &request).await {
            Ok(Payload::Json(Value::Object(map))) => {
                product = Some(map);
                break;
            }
            Ok(other) => {
                let body = other.into_value().to_string();
                last_failure = Failure::new(
                    FailureKind::MalformedResponse,
                    format!("Unexpected product info: {}", truncate(&body, 80, "...")),
                );
            }
            Err(failure) => last_failure = failure,
        }
        trace!(
            "product info attempt {} on {} failed: {}",
            attempt + 1,
            target.host(),
            last_failure
        );
    }
    let Some(product) = product else {
        return Err(last_failure);
    };

    let system_id = match api.call(target, &ApiRequest::get(SYSTEM_ID_PATH, timeout)).await {
        Ok(Payload::Json(value)) => text_of(&value),
        Ok(Payload::Text(_)) => String::new(),
        Err(failure) => {
            debug!("system_id on {}: {}", target.host(), failure);
            String::new()
        }
    };

    let firmware = match api.call(target, &ApiRequest::get(FW_INFO_PATH, timeout)).await {
        Ok(Payload::Json(Value::Object(map))) => Some(map),
        _ => None,
    };

    Ok(RouterInfo::from_documents(&product, &system_id, firmware.as_ref()))
}

impl<A: DeviceApi, F: FileTransfer> Fleet<A, F> {
    /// Probe every address in `range` and report which ones are routers.
    ///
    /// Results are in address order. An empty `username` means the
    /// configured default; `port` defaults to the configured HTTP port.
    pub async fn discover(
        &self,
        range: &str,
        username: &str,
        password: &str,
        port: Option<u16>,
    ) -> Result<Vec<Discovered>> {
        if range.trim().is_empty() {
            return Err(DispatchError::NoAddresses { spec: String::new() }.into());
        }
        if password.is_empty() {
            return Err(DispatchError::MissingPassword.into());
        }
        let addresses = expand_address_range(range, self.config.max_discovery_addresses)?;

        let port = port.unwrap_or(self.config.default_http_port);
        let targets: Vec<Target> = addresses
            .iter()
            .map(|address| Target::new(address.to_string()).port(port).credentials(username, password))
            .collect();
        let prepared = self.prepare(&targets);

        let limit = self
            .config
            .concurrency_limit(prepared.len(), ConcurrencyProfile::Probe);
        info!(
            "discover: probing {} address(es) on port {}, concurrency {}",
            prepared.len(),
            port,
            limit
        );

        let timeout = self.config.discovery_timeout;
        let retries = self.config.discovery_retries;
        let results = fan_out(&prepared, limit, |_, target| {
            let api = self.api.clone();
            async move { fetch_router_info(api.as_ref(), &target, timeout, retries).await }
        })
        .await;

        let discovered: Vec<Discovered> = prepared
            .into_iter()
            .zip(results)
            .map(|(mut target, result)| {
                let result = result.and_then(|probed| probed);
                if let Ok(info) = &result {
                    target.display_name = info.hostname.clone();
                }
                Discovered {
                    target,
                    outcome: Outcome::from(result),
                }
            })
            .collect();

        info!(
            "discover: {} of {} address(es) answered",
            discovered.iter().filter(|d| d.is_online()).count(),
            discovered.len()
        );
        Ok(discovered)
    }

    /// Re-read identity information for known targets.
    pub async fn refresh_info(&self, targets: &[Target]) -> Vec<TargetOutcome<RouterInfo>> {
        self.refresh(targets, Vec::new())
            .await
            .into_iter()
            .map(|refreshed| refreshed.info)
            .collect()
    }

    /// Like [`refresh_info`](Self::refresh_info), then `GET` each of `paths`
    /// on every target whose identity was read.
    ///
    /// `paths` are usually the inventory's stored columns
    /// ([`Inventory::api_paths`](crate::Inventory::api_paths)). Cells follow
    /// the rules of [`dispatch_read`](Self::dispatch_read).
    pub async fn refresh_info_with_paths<S: AsRef<str>>(
        &self,
        targets: &[Target],
        paths: &[S],
    ) -> Result<Vec<Refreshed>> {
        let expressions = parse_expressions(paths)?;
        Ok(self.refresh(targets, expressions).await)
    }

    async fn refresh(&self, targets: &[Target], expressions: Vec<PathExpression>) -> Vec<Refreshed> {
        let limit = self
            .config
            .concurrency_limit(targets.len(), ConcurrencyProfile::Probe);
        info!(
            "refresh: {} target(s), {} path(s), concurrency {}",
            targets.len(),
            expressions.len(),
            limit
        );

        let expressions = Arc::new(expressions);
        let timeout = self.config.discovery_timeout;
        let http_timeout = self.config.http_timeout;
        let retries = self.config.discovery_retries;
        let started = Instant::now();
        let prepared = self.prepare(targets);

        let results = fan_out(&prepared, limit, |index, target| {
            let api = self.api.clone();
            let expressions = expressions.clone();
            async move {
                let started = Instant::now();
                let (outcome, cells) = match target.validate() {
                    Err(reason) => (Outcome::Skipped(reason), IndexMap::new()),
                    Ok(()) => match fetch_router_info(api.as_ref(), &target, timeout, retries).await {
                        Ok(info) => {
                            let cells = read_target(api.as_ref(), &target, &expressions, http_timeout).await;
                            (Outcome::Success(info), cells)
                        }
                        Err(failure) => (Outcome::Failed(failure), IndexMap::new()),
                    },
                };
                Refreshed {
                    info: TargetOutcome {
                        target: TargetIdentity::of(index, &target),
                        outcome,
                        elapsed: started.elapsed(),
                    },
                    cells,
                }
            }
        })
        .await;

        prepared
            .iter()
            .zip(results)
            .enumerate()
            .map(|(index, (target, result))| {
                result.unwrap_or_else(|fault| Refreshed {
                    info: TargetOutcome {
                        target: TargetIdentity::of(index, target),
                        outcome: Outcome::Failed(fault),
                        elapsed: started.elapsed(),
                    },
                    cells: IndexMap::new(),
                })
            })
            .collect()
    }
}

/// First non-empty value among `keys`, as text.
fn first_text(document: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| document.get(*key))
        .map(text_of)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn firmware_version(firmware: &Map<String, Value>) -> String {
    let part = |key: &str| firmware.get(key).map(text_of).unwrap_or_default();
    format!(
        "{}.{}.{} {} {}",
        part("major_version"),
        part("minor_version"),
        part("patch_version"),
        part("fw_release_tag"),
        part("build_date")
    )
    .trim_matches(|c: char| c == '.' || c.is_whitespace())
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FakeApi, FakeTransfer};
    use super::*;
    use crate::config::FleetConfig;
    use crate::error::Error;
    use serde_json::json;

    fn strings(addresses: &[IpAddr]) -> Vec<String> {
        addresses.iter().map(IpAddr::to_string).collect()
    }

    fn router(api: FakeApi, host: &str, system_id: &str) -> FakeApi {
        api.json(
            host,
            PRODUCT_INFO_PATH,
            json!({
                "product_name": "IBR900-600M",
                "mac0": "00:30:44:1a:2b:3c",
                "manufacturing": {"serial_num": "WA1234"}
            }),
        )
        .json(host, SYSTEM_ID_PATH, json!(system_id))
        .json(
            host,
            FW_INFO_PATH,
            json!({
                "major_version": 7, "minor_version": 24, "patch_version": 1,
                "fw_release_tag": "GA", "build_date": "2024-06-01"
            }),
        )
    }

    #[test]
    fn test_expand_ranges() {
        let addresses = expand_address_range("192.168.1.10-12, 192.168.1.11\n192.168.1.2", 512).unwrap();
        assert_eq!(
            strings(&addresses),
            vec!["192.168.1.2", "192.168.1.10", "192.168.1.11", "192.168.1.12"]
        );

        let reversed = expand_address_range("10.0.1.3-10.0.0.254", 512).unwrap();
        assert_eq!(
            strings(&reversed),
            vec!["10.0.0.254", "10.0.0.255", "10.0.1.0", "10.0.1.1", "10.0.1.2", "10.0.1.3"]
        );
    }

    #[test]
    fn test_expand_cidr() {
        let hosts = expand_address_range("10.0.0.0/30", 512).unwrap();
        assert_eq!(strings(&hosts), vec!["10.0.0.1", "10.0.0.2"]);

        let single = expand_address_range("10.0.0.7/32", 512).unwrap();
        assert_eq!(strings(&single), vec!["10.0.0.7"]);

        assert_eq!(expand_address_range("10.0.0.0/24", 512).unwrap().len(), 254);
    }

    #[test]
    fn test_expand_ignores_garbage_and_sorts_numerically() {
        let addresses = expand_address_range("nope, 10.0.0.10, 300.1.1.1, 10.0.0.9, 10.0.0.1-x, fe80::1", 512).unwrap();
        assert_eq!(strings(&addresses), vec!["10.0.0.9", "10.0.0.10", "fe80::1"]);
    }

    #[test]
    fn test_expand_limits() {
        let err = expand_address_range("10.0.0.0/22", 512).unwrap_err();
        assert!(matches!(
            err,
            Error::Dispatch(DispatchError::TooManyAddresses { count: 1022, max: 512 })
        ));

        let err = expand_address_range("10.0.0.1-200, 10.0.1.1-200", 300).unwrap_err();
        assert!(matches!(
            err,
            Error::Dispatch(DispatchError::TooManyAddresses { count: 400, max: 300 })
        ));

        assert!(matches!(
            expand_address_range("bogus", 512),
            Err(Error::Dispatch(DispatchError::NoAddresses { .. }))
        ));
    }

    #[test]
    fn test_router_info_from_documents() {
        let product = json!({
            "product_name": "E300-C18B",
            "mac": "00-30-44-aa-bb-cc",
            "serial_number": "MM0001"
        });
        let info = RouterInfo::from_documents(product.as_object().unwrap(), "", None);
        assert_eq!(info.mac_address, "003044AABBCC");
        assert_eq!(info.serial_number, "MM0001");
        assert_eq!(info.hostname, "E300-BCC");
        assert_eq!(info.ncos_version, "");
        assert!(info.is_identified());

        assert!(!RouterInfo::from_documents(&Map::new(), "", None).is_identified());
    }

    #[tokio::test]
    async fn test_fetch_router_info() {
        let api = router(FakeApi::new(), "10.0.0.1", "branch-12");
        let target = Target::new("10.0.0.1").credentials("admin", "pw");

        let info = fetch_router_info(&api, &target, Duration::from_secs(1), 0)
            .await
            .unwrap();
        assert_eq!(
            info,
            RouterInfo {
                hostname: "branch-12".to_string(),
                mac_address: "0030441A2B3C".to_string(),
                serial_number: "WA1234".to_string(),
                product_name: "IBR900-600M".to_string(),
                ncos_version: "7.24.1 GA 2024-06-01".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_router_info_retries_then_fails() {
        let api = FakeApi::new().respond(
            "10.0.0.1",
            PRODUCT_INFO_PATH,
            Err(Failure::new(FailureKind::TransportTimeout, "Connection timed out")),
        );
        let target = Target::new("10.0.0.1").credentials("admin", "pw");

        let failure = fetch_router_info(&api, &target, Duration::from_secs(1), 2)
            .await
            .unwrap_err();
        assert!(failure.is_timeout());
        assert_eq!(api.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_discover() {
        let api = router(FakeApi::new(), "10.0.0.3", "");
        let api = router(api, "10.0.0.1", "hq").delay("10.0.0.1", Duration::from_millis(30));
        let fleet = Fleet::new(FleetConfig::default(), api, FakeTransfer::new());

        let discovered = fleet.discover("10.0.0.1-3", "", "pw", Some(80)).await.unwrap();

        assert_eq!(discovered.len(), 3);
        assert_eq!(discovered[0].target.address, "10.0.0.1");
        assert_eq!(discovered[0].target.display_name, "hq");
        assert_eq!(discovered[0].target.username, "admin");
        assert_eq!(discovered[0].target.port, 80);
        assert!(discovered[0].is_online());
        assert!(!discovered[1].is_online());
        assert!(discovered[1].outcome.failure().is_some());
        assert_eq!(discovered[2].target.display_name, "IBR900-B3C");
    }

    #[tokio::test]
    async fn test_discover_rejects_bad_input() {
        let fleet = Fleet::new(FleetConfig::default(), FakeApi::new(), FakeTransfer::new());

        assert!(matches!(
            fleet.discover("10.0.0.1", "admin", "", None).await,
            Err(Error::Dispatch(DispatchError::MissingPassword))
        ));
        assert!(matches!(
            fleet.discover("  ", "admin", "pw", None).await,
            Err(Error::Dispatch(DispatchError::NoAddresses { .. }))
        ));
        assert!(matches!(
            fleet.discover("10.0.0.0/16", "admin", "pw", None).await,
            Err(Error::Dispatch(DispatchError::TooManyAddresses { .. }))
        ));
        assert!(fleet.api().calls().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_info() {
        let api = router(FakeApi::new(), "10.0.0.1", "r1").panic_on("10.0.0.3");
        let fleet = Fleet::new(FleetConfig::default(), api, FakeTransfer::new());
        let targets = vec![
            Target::new("10.0.0.1").credentials("admin", "pw"),
            Target::new("10.0.0.2"),
            Target::new("10.0.0.3").credentials("admin", "pw"),
        ];

        let outcomes = fleet.refresh_info(&targets).await;

        assert_eq!(outcomes[0].outcome.success().unwrap().hostname, "r1");
        assert!(outcomes[1].outcome.is_skipped());
        assert_eq!(outcomes[2].outcome.failure().unwrap().kind, FailureKind::TaskFault);
        assert_eq!(outcomes[2].target.index, 2);
    }

    #[tokio::test]
    async fn test_refresh_rereads_path_columns() {
        let api = router(FakeApi::new(), "10.0.0.1", "r1")
            .json("10.0.0.1", "status/wan/primary_device", json!("mdm-1"))
            .json(
                "10.0.0.1",
                "status/wan/devices",
                json!({"mdm-1": {"status": "up"}, "ethernet-wan": {"status": "down"}}),
            )
            .respond(
                "10.0.0.2",
                PRODUCT_INFO_PATH,
                Err(Failure::new(FailureKind::TransportTimeout, "Connection timed out")),
            );
        let fleet = Fleet::new(FleetConfig::default(), api, FakeTransfer::new());
        let targets = vec![
            Target::new("10.0.0.1").credentials("admin", "pw"),
            Target::new("10.0.0.2").credentials("admin", "pw"),
        ];

        let refreshed = fleet
            .refresh_info_with_paths(&targets, &["status/wan/primary_device", "status/wan/devices/mdm*/status", " "])
            .await
            .unwrap();

        assert_eq!(refreshed[0].info.outcome.success().unwrap().hostname, "r1");
        assert_eq!(refreshed[0].cells["status/wan/primary_device"], json!("mdm-1"));
        assert_eq!(refreshed[0].cells["status/wan/devices/mdm-1/status"], json!("up"));
        assert_eq!(refreshed[0].cells.len(), 2);

        // No identity, no path reads.
        assert!(refreshed[1].info.outcome.failure().is_some());
        assert!(refreshed[1].cells.is_empty());
        assert!(
            fleet
                .api()
                .calls()
                .iter()
                .all(|(host, _, path, _)| host == "10.0.0.1" || path == PRODUCT_INFO_PATH)
        );
    }

    #[tokio::test]
    async fn test_refresh_rejects_bad_path() {
        let fleet = Fleet::new(FleetConfig::default(), FakeApi::new(), FakeTransfer::new());
        let targets = vec![Target::new("10.0.0.1").credentials("admin", "pw")];
        assert!(fleet.refresh_info_with_paths(&targets, &["//"]).await.is_err());
        assert!(fleet.api().calls().is_empty());
    }
}
