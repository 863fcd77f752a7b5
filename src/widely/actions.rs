//! Device actions and the single dispatch path they all go through.
//!
//! Every "do something to one line" operation is a [`DeviceAction`]. The
//! mapping from variant to Widely function name and payload lives in
//! [`DeviceAction::route`] and nowhere else; new operations extend that
//! match instead of repeating the call/validate sequence.

use std::sync::Arc;

use serde_json::{json, Value};

use super::client::WidelyApi;
use super::error::WidelyError;
use super::types::{EndpointId, Payload, RemoteResult};
use super::validate::{validate_required_params, validate_widely_result};

// ── Network preference ───────────────────────────────────────────

/// Which host network(s) a line may register on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkPreference {
    PelephoneOnly,
    PartnerOnly,
    BothPelephoneFirst,
    BothPartnerFirst,
}

/// Human-facing name → preference → upstream action literal.
const NETWORK_PREFERENCES: &[(&str, NetworkPreference, &str)] = &[
    (
        "pelephone_only",
        NetworkPreference::PelephoneOnly,
        "pelephone_only_force",
    ),
    (
        "partner_only",
        NetworkPreference::PartnerOnly,
        "partner_only_force",
    ),
    (
        "both_pelephone_first",
        NetworkPreference::BothPelephoneFirst,
        "both_networks_pl_first_force",
    ),
    (
        "both_partner_first",
        NetworkPreference::BothPartnerFirst,
        "both_networks_pr_first_force",
    ),
];

impl NetworkPreference {
    /// Upstream literal sent as `action` to `send_mobile_action`.
    pub fn upstream_action(self) -> &'static str {
        NETWORK_PREFERENCES
            .iter()
            .find(|(_, pref, _)| *pref == self)
            .map_or("", |(_, _, literal)| literal)
    }

    pub fn name(self) -> &'static str {
        NETWORK_PREFERENCES
            .iter()
            .find(|(_, pref, _)| *pref == self)
            .map_or("", |(name, _, _)| name)
    }

    pub fn supported_names() -> Vec<&'static str> {
        NETWORK_PREFERENCES.iter().map(|(name, _, _)| *name).collect()
    }
}

impl std::str::FromStr for NetworkPreference {
    type Err = WidelyError;

    /// Case-insensitive; spaces and dashes are treated as underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        NETWORK_PREFERENCES
            .iter()
            .find(|(name, _, _)| *name == normalized)
            .map(|(_, pref, _)| *pref)
            .ok_or_else(|| WidelyError::InvalidParam {
                field: "network".into(),
                reason: format!(
                    "unknown network preference '{s}'. Supported values: {}",
                    Self::supported_names().join(", ")
                ),
            })
    }
}

// ── Device action ────────────────────────────────────────────────

/// A supported action against one provisioned line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Terminate,
    ResetVoicemailPin,
    SendApn,
    SetNetwork(NetworkPreference),
    Freeze,
    Unfreeze,
    LockImei { imei: String },
    UnlockImei,
    ChangePackage { package_id: i64 },
}

impl DeviceAction {
    /// Stable identifier for logs and error context.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Terminate => "terminate",
            Self::ResetVoicemailPin => "reset_voicemail_pin",
            Self::SendApn => "send_apn",
            Self::SetNetwork(_) => "set_network",
            Self::Freeze => "freeze",
            Self::Unfreeze => "unfreeze",
            Self::LockImei { .. } => "lock_imei",
            Self::UnlockImei => "unlock_imei",
            Self::ChangePackage { .. } => "change_package",
        }
    }

    /// Widely function name and payload for this action.
    pub fn route(&self, endpoint_id: &EndpointId) -> (&'static str, Payload) {
        let id = endpoint_id.to_value();
        let (func_name, data) = match self {
            Self::Terminate => ("prov_terminate_mobile", json!({ "endpoint_id": id })),
            Self::ResetVoicemailPin => (
                "send_mobile_action",
                json!({ "endpoint_id": id, "action": "prov_reset_vm_pincode" }),
            ),
            Self::SendApn => (
                "send_mobile_action",
                json!({ "endpoint_id": id, "action": "send_apn" }),
            ),
            Self::SetNetwork(pref) => (
                "send_mobile_action",
                json!({ "endpoint_id": id, "action": pref.upstream_action() }),
            ),
            Self::Freeze => (
                "freeze_unfreeze_endpoint",
                json!({ "endpoint_id": id, "action": "freeze" }),
            ),
            Self::Unfreeze => (
                "freeze_unfreeze_endpoint",
                json!({ "endpoint_id": id, "action": "unfreeze" }),
            ),
            Self::LockImei { imei } => (
                "prov_update_mobile",
                json!({ "endpoint_id": id, "imei": imei, "lock_imei": true }),
            ),
            Self::UnlockImei => (
                "prov_update_mobile",
                json!({ "endpoint_id": id, "lock_imei": false }),
            ),
            Self::ChangePackage { package_id } => (
                "prov_update_mobile_subscription",
                json!({ "endpoint_id": id, "package_id": package_id }),
            ),
        };
        let data = match data {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        (func_name, data)
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

/// Sends a [`DeviceAction`] to one line: validate, route, call, check.
#[derive(Clone)]
pub struct ActionDispatcher {
    api: Arc<dyn WidelyApi>,
}

impl ActionDispatcher {
    pub fn new(api: Arc<dyn WidelyApi>) -> Self {
        Self { api }
    }

    /// Both arguments are required. Missing ones fail with
    /// [`WidelyError::Validation`] before anything is sent.
    pub async fn send_action(
        &self,
        endpoint_id: Option<&EndpointId>,
        action: Option<&DeviceAction>,
    ) -> Result<RemoteResult, WidelyError> {
        let id_value = endpoint_id.map_or(Value::Null, EndpointId::to_value);
        let action_value = action.map_or(Value::Null, |a| Value::from(a.name()));
        validate_required_params([("endpoint_id", &id_value), ("action", &action_value)])?;

        let (Some(endpoint_id), Some(action)) = (endpoint_id, action) else {
            return Err(WidelyError::Validation {
                missing: vec!["endpoint_id".into(), "action".into()],
            });
        };

        let (func_name, data) = action.route(endpoint_id);
        tracing::info!(
            endpoint_id = %endpoint_id,
            action = action.name(),
            func_name,
            "Sending device action"
        );

        let result = self.api.call(func_name, data).await?;
        validate_widely_result(
            &result,
            &format!("Failed to {} for endpoint {endpoint_id}", action.name()),
            false,
        )?;
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::widely::ErrorCode;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every call and answers from a scripted queue (default: success).
    #[derive(Default)]
    pub(crate) struct RecordingApi {
        pub calls: Mutex<Vec<(String, Payload)>>,
        pub responses: Mutex<Vec<Result<RemoteResult, WidelyError>>>,
    }

    impl RecordingApi {
        pub fn with_responses(responses: Vec<Result<RemoteResult, WidelyError>>) -> Self {
            let mut responses = responses;
            responses.reverse();
            Self {
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl WidelyApi for RecordingApi {
        async fn call(&self, func_name: &str, data: Payload) -> Result<RemoteResult, WidelyError> {
            self.calls.lock().push((func_name.to_string(), data));
            self.responses.lock().pop().unwrap_or_else(|| {
                Ok(RemoteResult {
                    error_code: Some(ErrorCode::Numeric(200)),
                    ..RemoteResult::default()
                })
            })
        }
    }

    fn dispatcher(api: &Arc<RecordingApi>) -> ActionDispatcher {
        ActionDispatcher::new(api.clone())
    }

    #[tokio::test]
    async fn missing_endpoint_fails_before_network() {
        let api = Arc::new(RecordingApi::default());
        let err = dispatcher(&api)
            .send_action(None, Some(&DeviceAction::SendApn))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(
            err,
            WidelyError::Validation {
                missing: vec!["endpoint_id".into()]
            }
        );
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_both_lists_both() {
        let api = Arc::new(RecordingApi::default());
        let err = dispatcher(&api).send_action(None, None).await.unwrap_err();
        assert!(err.to_string().contains("endpoint_id, action"));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn blank_text_endpoint_is_missing() {
        let api = Arc::new(RecordingApi::default());
        let id = EndpointId::from(" ");
        let err = dispatcher(&api)
            .send_action(Some(&id), Some(&DeviceAction::Terminate))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn send_apn_goes_through_send_mobile_action() {
        let api = Arc::new(RecordingApi::default());
        dispatcher(&api)
            .send_action(Some(&EndpointId::from(881)), Some(&DeviceAction::SendApn))
            .await
            .unwrap();

        let calls = api.calls.lock();
        assert_eq!(calls[0].0, "send_mobile_action");
        assert_eq!(calls[0].1["endpoint_id"], json!(881));
        assert_eq!(calls[0].1["action"], json!("send_apn"));
    }

    #[tokio::test]
    async fn upstream_failure_propagates_with_context() {
        let api = Arc::new(RecordingApi::with_responses(vec![Ok(RemoteResult {
            status: Some("ERROR".into()),
            message: Some("line already terminated".into()),
            ..RemoteResult::default()
        })]));
        let err = dispatcher(&api)
            .send_action(Some(&EndpointId::from(5)), Some(&DeviceAction::Terminate))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        let msg = err.to_string();
        assert!(msg.contains("terminate"));
        assert!(msg.contains("endpoint 5"));
        assert!(msg.contains("line already terminated"));
    }

    #[tokio::test]
    async fn success_without_data_is_accepted() {
        let api = Arc::new(RecordingApi::default());
        let result = dispatcher(&api)
            .send_action(Some(&EndpointId::from(5)), Some(&DeviceAction::Freeze))
            .await
            .unwrap();
        assert!(result.data.is_none());
    }

    #[test]
    fn route_table_covers_every_action() {
        let id = EndpointId::from(10);
        let cases = [
            (DeviceAction::Terminate, "prov_terminate_mobile", None),
            (
                DeviceAction::ResetVoicemailPin,
                "send_mobile_action",
                Some("prov_reset_vm_pincode"),
            ),
            (DeviceAction::SendApn, "send_mobile_action", Some("send_apn")),
            (
                DeviceAction::SetNetwork(NetworkPreference::BothPelephoneFirst),
                "send_mobile_action",
                Some("both_networks_pl_first_force"),
            ),
            (
                DeviceAction::SetNetwork(NetworkPreference::PelephoneOnly),
                "send_mobile_action",
                Some("pelephone_only_force"),
            ),
            (DeviceAction::Freeze, "freeze_unfreeze_endpoint", Some("freeze")),
            (
                DeviceAction::Unfreeze,
                "freeze_unfreeze_endpoint",
                Some("unfreeze"),
            ),
            (DeviceAction::UnlockImei, "prov_update_mobile", None),
            (
                DeviceAction::ChangePackage { package_id: 3 },
                "prov_update_mobile_subscription",
                None,
            ),
        ];
        for (action, func, literal) in cases {
            let (func_name, data) = action.route(&id);
            assert_eq!(func_name, func, "{action:?}");
            assert_eq!(data["endpoint_id"], json!(10));
            assert_eq!(data.get("action").and_then(Value::as_str), literal, "{action:?}");
        }
    }

    #[test]
    fn lock_imei_payload_carries_imei() {
        let (_, data) = DeviceAction::LockImei {
            imei: "356938035643809".into(),
        }
        .route(&EndpointId::from("77"));
        assert_eq!(data["endpoint_id"], json!("77"));
        assert_eq!(data["imei"], json!("356938035643809"));
        assert_eq!(data["lock_imei"], json!(true));
    }

    #[test]
    fn network_preference_parsing() {
        assert_eq!(
            "Both Pelephone First".parse::<NetworkPreference>().unwrap(),
            NetworkPreference::BothPelephoneFirst
        );
        assert_eq!(
            "pelephone-only".parse::<NetworkPreference>().unwrap(),
            NetworkPreference::PelephoneOnly
        );
        let err = "hot".parse::<NetworkPreference>().unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("partner_only"));
    }

    #[test]
    fn every_preference_has_name_and_literal() {
        for name in NetworkPreference::supported_names() {
            let pref: NetworkPreference = name.parse().unwrap();
            assert_eq!(pref.name(), name);
            assert!(pref.upstream_action().ends_with("_force"));
        }
    }
}
