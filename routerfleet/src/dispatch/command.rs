//! Write commands: one API call per target.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use serde_json::Value;

use super::outcome::{Outcome, TargetIdentity, TargetOutcome};
use super::pool::fan_out;
use super::Fleet;
use crate::config::ConcurrencyProfile;
use crate::error::{DispatchError, Result};
use crate::target::Target;
use crate::transport::{ApiMethod, ApiRequest, DeviceApi, FileTransfer};

impl<A: DeviceApi, F: FileTransfer> Fleet<A, F> {
    /// Issue `method path` with `payload` on every target.
    ///
    /// The payload is sent as the form field `data` for `PUT`/`POST`.
    /// Results are in input order; render them with
    /// [`Outcome::status_text`] for the `Success` / `Failed: ...` form.
    pub async fn dispatch_command(
        &self,
        targets: &[Target],
        method: ApiMethod,
        path: &str,
        payload: Option<Value>,
    ) -> Result<Vec<TargetOutcome>> {
        let path = path.trim();
        if path.is_empty() {
            return Err(DispatchError::EmptyPath.into());
        }

        let limit = self
            .config
            .concurrency_limit(targets.len(), ConcurrencyProfile::Command);
        info!(
            "command: {} {} across {} target(s), concurrency {}",
            method,
            path,
            targets.len(),
            limit
        );

        let request = Arc::new(ApiRequest {
            method,
            path: path.to_string(),
            payload,
            timeout: self.config.http_timeout,
        });
        let started = Instant::now();
        let prepared = self.prepare(targets);

        let results = fan_out(&prepared, limit, |index, target| {
            let api = self.api.clone();
            let request = request.clone();
            async move {
                let started = Instant::now();
                let outcome = match target.validate() {
                    Err(reason) => {
                        info!("command: skipping target {} ({})", index, reason);
                        Outcome::Skipped(reason)
                    }
                    Ok(()) => {
                        let outcome = Outcome::from(api.call(&target, &request).await);
                        if let Some(failure) = outcome.failure() {
                            debug!("command on {}: {} ({})", target.host(), failure, failure.kind);
                        }
                        outcome
                    }
                };
                TargetOutcome {
                    target: TargetIdentity::of(index, &target),
                    outcome,
                    elapsed: started.elapsed(),
                }
            }
        })
        .await;

        Ok(prepared
            .iter()
            .zip(results)
            .enumerate()
            .map(|(index, (target, result))| {
                result.unwrap_or_else(|fault| TargetOutcome {
                    target: TargetIdentity::of(index, target),
                    outcome: Outcome::Failed(fault),
                    elapsed: started.elapsed(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FakeApi, FakeTransfer};
    use super::*;
    use crate::classify::{Failure, FailureKind, Payload};
    use crate::config::FleetConfig;
    use crate::target::SkipReason;
    use serde_json::json;
    use std::time::Duration;

    fn fleet(api: FakeApi) -> Fleet<FakeApi, FakeTransfer> {
        Fleet::new(FleetConfig::default(), api, FakeTransfer::new())
    }

    #[tokio::test]
    async fn test_three_targets_one_skipped() {
        let api = FakeApi::new()
            .json("10.0.0.1", "control/system/reboot", json!({"ok": true}))
            .respond(
                "10.0.0.3",
                "control/system/reboot",
                Err(Failure::new(FailureKind::TransportTimeout, "Connection timed out")),
            )
            .delay("10.0.0.1", Duration::from_millis(40));
        let fleet = fleet(api);
        let targets = vec![
            Target::new("10.0.0.1").credentials("", "pw"),
            Target::new("10.0.0.2").credentials("admin", ""),
            Target::new("10.0.0.3").credentials("admin", "pw").display_name("r3"),
        ];

        let outcomes = fleet
            .dispatch_command(&targets, ApiMethod::Put, "/control/system/reboot", Some(json!(true)))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].target.address, "10.0.0.1");
        assert_eq!(outcomes[0].outcome.status_text(), "Success");
        assert_eq!(outcomes[1].outcome, Outcome::Skipped(SkipReason::MissingCredentials));
        assert_eq!(outcomes[2].target.display_name, "r3");
        assert_eq!(
            outcomes[2].outcome.status_text(),
            "Failed: Connection timed out"
        );
        assert!(outcomes[2].outcome.failure().unwrap().is_timeout());

        // Skipped target never reached the transport; default username applied.
        let calls = fleet.api().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(host, _, _, _)| host != "10.0.0.2"));
        let first = calls.iter().find(|(host, ..)| host == "10.0.0.1").unwrap();
        assert_eq!(first.1, ApiMethod::Put);
        assert_eq!(first.3, Some(json!(true)));
    }

    #[tokio::test]
    async fn test_every_target_fails() {
        let fleet = fleet(FakeApi::new());
        let targets: Vec<Target> = (1..=25)
            .map(|i| Target::new(format!("10.1.0.{}", i)).credentials("admin", "pw"))
            .collect();

        let outcomes = fleet
            .dispatch_command(&targets, ApiMethod::Delete, "config/x", None)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 25);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.target.index, i);
            assert_eq!(outcome.target.address, format!("10.1.0.{}", i + 1));
            assert!(!outcome.is_success());
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_task_fault() {
        let api = FakeApi::new()
            .json("10.0.0.1", "status", json!(1))
            .panic_on("10.0.0.2");
        let fleet = fleet(api);
        let targets = vec![
            Target::new("10.0.0.1").credentials("admin", "pw"),
            Target::new("10.0.0.2").credentials("admin", "pw"),
        ];

        let outcomes = fleet
            .dispatch_command(&targets, ApiMethod::Get, "status", None)
            .await
            .unwrap();

        assert_eq!(outcomes[0].outcome, Outcome::Success(Payload::Json(json!(1))));
        let fault = outcomes[1].outcome.failure().unwrap();
        assert_eq!(fault.kind, FailureKind::TaskFault);
        assert_eq!(outcomes[1].target.address, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_empty_path_rejected() {
        let fleet = fleet(FakeApi::new());
        let err = fleet
            .dispatch_command(&[], ApiMethod::Put, "  ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Dispatch(DispatchError::EmptyPath)));
    }
}
