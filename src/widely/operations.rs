//! Line and subscriber operations exposed to the rest of the back office.
//!
//! Reads call Widely directly and require data. Device-control operations
//! validate their own extra parameters, pick a [`DeviceAction`], and hand
//! off to the [`ActionDispatcher`].

use std::sync::Arc;

use serde_json::{json, Value};

use super::actions::{ActionDispatcher, DeviceAction, NetworkPreference};
use super::client::WidelyApi;
use super::error::WidelyError;
use super::types::{EndpointId, Payload, RemoteResult};
use super::validate::{validate_required_params, validate_widely_result};
use crate::config::WidelyConfig;

/// Widely operations used by the back office.
#[derive(Clone)]
pub struct MobileService {
    api: Arc<dyn WidelyApi>,
    dispatcher: ActionDispatcher,
    account_id: i64,
    brand_id: i64,
}

fn object(v: Value) -> Payload {
    match v {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::from(s.trim()))
}

impl MobileService {
    pub fn new(api: Arc<dyn WidelyApi>, config: &WidelyConfig) -> Self {
        Self {
            dispatcher: ActionDispatcher::new(api.clone()),
            api,
            account_id: config.account_id.unwrap_or_default(),
            brand_id: config.brand_id.unwrap_or_default(),
        }
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Call, require success and data, return `data` unchanged.
    async fn fetch(&self, func_name: &str, data: Payload, context: &str) -> Result<Value, WidelyError> {
        let result = self.api.call(func_name, data).await?;
        validate_widely_result(&result, context, true)?;
        Ok(result.into_data())
    }

    // ── Reads ────────────────────────────────────────────────

    /// Look up subscribers by SIM number.
    pub async fn search_users(&self, sim_number: Option<&str>) -> Result<Value, WidelyError> {
        let sim = opt_text(sim_number);
        validate_required_params([("simNumber", &sim)])?;

        self.fetch(
            "search_users",
            object(json!({ "search_string": sim, "brand_id": self.brand_id })),
            "Failed to search users",
        )
        .await
    }

    /// Lines belonging to one subscriber account.
    pub async fn get_mobiles(&self, domain_user_id: Option<&Value>) -> Result<Value, WidelyError> {
        let id = domain_user_id.cloned().unwrap_or(Value::Null);
        validate_required_params([("domain_user_id", &id)])?;

        self.fetch(
            "get_mobiles",
            object(json!({ "domain_user_id": id })),
            "Failed to get mobiles",
        )
        .await
    }

    pub async fn get_mobile_info(&self, endpoint_id: Option<&EndpointId>) -> Result<Value, WidelyError> {
        let id = endpoint_id.map_or(Value::Null, EndpointId::to_value);
        validate_required_params([("endpoint_id", &id)])?;

        self.fetch(
            "get_mobile_info",
            object(json!({ "endpoint_id": id })),
            "Failed to get mobile info",
        )
        .await
    }

    /// Packages available to the account, filtered by comma-separated types.
    pub async fn get_packages_with_info(
        &self,
        package_types: Option<&str>,
    ) -> Result<Value, WidelyError> {
        let raw = opt_text(package_types);
        validate_required_params([("package_types", &raw)])?;

        let types: Vec<&str> = package_types
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();

        self.fetch(
            "get_packages_with_info",
            object(json!({ "account_id": self.account_id, "package_types": types })),
            "Failed to get packages",
        )
        .await
    }

    // ── Device control ───────────────────────────────────────

    pub async fn terminate_mobile(&self, endpoint_id: Option<&EndpointId>) -> Result<RemoteResult, WidelyError> {
        self.dispatcher
            .send_action(endpoint_id, Some(&DeviceAction::Terminate))
            .await
    }

    pub async fn reset_voicemail_pin(
        &self,
        endpoint_id: Option<&EndpointId>,
    ) -> Result<RemoteResult, WidelyError> {
        self.dispatcher
            .send_action(endpoint_id, Some(&DeviceAction::ResetVoicemailPin))
            .await
    }

    pub async fn send_apn(&self, endpoint_id: Option<&EndpointId>) -> Result<RemoteResult, WidelyError> {
        self.dispatcher
            .send_action(endpoint_id, Some(&DeviceAction::SendApn))
            .await
    }

    /// `network` is a human-facing name such as `both_pelephone_first`.
    pub async fn change_network(
        &self,
        endpoint_id: Option<&EndpointId>,
        network: Option<&str>,
    ) -> Result<RemoteResult, WidelyError> {
        let id = endpoint_id.map_or(Value::Null, EndpointId::to_value);
        let net = opt_text(network);
        validate_required_params([("endpoint_id", &id), ("network", &net)])?;

        let pref: NetworkPreference = network.unwrap_or_default().parse()?;
        self.dispatcher
            .send_action(endpoint_id, Some(&DeviceAction::SetNetwork(pref)))
            .await
    }

    pub async fn set_frozen(
        &self,
        endpoint_id: Option<&EndpointId>,
        frozen: bool,
    ) -> Result<RemoteResult, WidelyError> {
        let action = if frozen {
            DeviceAction::Freeze
        } else {
            DeviceAction::Unfreeze
        };
        self.dispatcher.send_action(endpoint_id, Some(&action)).await
    }

    pub async fn lock_imei(
        &self,
        endpoint_id: Option<&EndpointId>,
        imei: Option<&str>,
    ) -> Result<RemoteResult, WidelyError> {
        let id = endpoint_id.map_or(Value::Null, EndpointId::to_value);
        let imei_value = opt_text(imei);
        validate_required_params([("endpoint_id", &id), ("imei", &imei_value)])?;

        let imei = imei.unwrap_or_default().trim();
        if !(14..=16).contains(&imei.len()) || !imei.chars().all(|c| c.is_ascii_digit()) {
            return Err(WidelyError::InvalidParam {
                field: "imei".into(),
                reason: "expected 14-16 digits".into(),
            });
        }

        self.dispatcher
            .send_action(
                endpoint_id,
                Some(&DeviceAction::LockImei {
                    imei: imei.to_string(),
                }),
            )
            .await
    }

    pub async fn unlock_imei(&self, endpoint_id: Option<&EndpointId>) -> Result<RemoteResult, WidelyError> {
        self.dispatcher
            .send_action(endpoint_id, Some(&DeviceAction::UnlockImei))
            .await
    }

    pub async fn change_package(
        &self,
        endpoint_id: Option<&EndpointId>,
        package_id: Option<i64>,
    ) -> Result<RemoteResult, WidelyError> {
        let id = endpoint_id.map_or(Value::Null, EndpointId::to_value);
        let pkg = package_id.map_or(Value::Null, Value::from);
        validate_required_params([("endpoint_id", &id), ("package_id", &pkg)])?;

        let Some(package_id) = package_id else {
            return Err(WidelyError::Validation {
                missing: vec!["package_id".into()],
            });
        };
        self.dispatcher
            .send_action(endpoint_id, Some(&DeviceAction::ChangePackage { package_id }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widely::actions::tests::RecordingApi;
    use crate::widely::ErrorCode;

    fn config() -> WidelyConfig {
        WidelyConfig {
            account_id: Some(4242),
            brand_id: Some(7),
            ..WidelyConfig::default()
        }
    }

    fn service(api: &Arc<RecordingApi>) -> MobileService {
        MobileService::new(api.clone(), &config())
    }

    fn ok_with(data: Value) -> Result<RemoteResult, WidelyError> {
        Ok(RemoteResult {
            error_code: Some(ErrorCode::Numeric(200)),
            data: Some(data),
            ..RemoteResult::default()
        })
    }

    #[tokio::test]
    async fn packages_split_types_and_return_data_unchanged() {
        let data = json!([{"package_id": 1, "name": "Base 10GB"}, {"package_id": 2}]);
        let api = Arc::new(RecordingApi::with_responses(vec![ok_with(data.clone())]));

        let out = service(&api).get_packages_with_info(Some("base")).await.unwrap();
        assert_eq!(out, data);

        let calls = api.calls.lock();
        assert_eq!(calls[0].0, "get_packages_with_info");
        assert_eq!(calls[0].1["package_types"], json!(["base"]));
        assert_eq!(calls[0].1["account_id"], json!(4242));
    }

    #[tokio::test]
    async fn packages_accept_multiple_types() {
        let api = Arc::new(RecordingApi::with_responses(vec![ok_with(json!([{}]))]));
        service(&api)
            .get_packages_with_info(Some("base, addon,"))
            .await
            .unwrap();
        assert_eq!(api.calls.lock()[0].1["package_types"], json!(["base", "addon"]));
    }

    #[tokio::test]
    async fn packages_empty_list_is_not_found() {
        let api = Arc::new(RecordingApi::with_responses(vec![ok_with(json!([]))]));
        let err = service(&api)
            .get_packages_with_info(Some("base"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn search_users_requires_sim_number() {
        let api = Arc::new(RecordingApi::default());
        let err = service(&api).search_users(Some("")).await.unwrap_err();
        assert!(err.to_string().contains("simNumber"));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn search_users_sends_brand_and_search_string() {
        let api = Arc::new(RecordingApi::with_responses(vec![ok_with(
            json!([{"domain_user_id": 9}]),
        )]));
        let out = service(&api).search_users(Some(" 8997201 ")).await.unwrap();
        assert_eq!(out[0]["domain_user_id"], json!(9));

        let calls = api.calls.lock();
        assert_eq!(calls[0].0, "search_users");
        assert_eq!(calls[0].1["search_string"], json!("8997201"));
        assert_eq!(calls[0].1["brand_id"], json!(7));
    }

    #[tokio::test]
    async fn get_mobiles_propagates_upstream_message() {
        let api = Arc::new(RecordingApi::with_responses(vec![Ok(RemoteResult {
            error_code: Some(ErrorCode::Numeric(403)),
            message: Some("Access denied".into()),
            ..RemoteResult::default()
        })]));
        let err = service(&api)
            .get_mobiles(Some(&json!(123)))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "Failed to get mobiles (error_code 403): Access denied");
    }

    #[tokio::test]
    async fn get_mobile_info_returns_object() {
        let api = Arc::new(RecordingApi::with_responses(vec![ok_with(
            json!({"endpoint_id": 55, "iccid": "8997"}),
        )]));
        let out = service(&api)
            .get_mobile_info(Some(&EndpointId::from(55)))
            .await
            .unwrap();
        assert_eq!(out["iccid"], json!("8997"));
    }

    #[tokio::test]
    async fn change_network_maps_name_to_literal() {
        let api = Arc::new(RecordingApi::default());
        service(&api)
            .change_network(Some(&EndpointId::from(1)), Some("Pelephone Only"))
            .await
            .unwrap();
        let calls = api.calls.lock();
        assert_eq!(calls[0].0, "send_mobile_action");
        assert_eq!(calls[0].1["action"], json!("pelephone_only_force"));
    }

    #[tokio::test]
    async fn change_network_lists_both_missing_params() {
        let api = Arc::new(RecordingApi::default());
        let err = service(&api).change_network(None, None).await.unwrap_err();
        assert!(err.to_string().contains("endpoint_id, network"));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn change_network_rejects_unknown_name() {
        let api = Arc::new(RecordingApi::default());
        let err = service(&api)
            .change_network(Some(&EndpointId::from(1)), Some("5g_only"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn lock_imei_validates_digits() {
        let api = Arc::new(RecordingApi::default());
        let err = service(&api)
            .lock_imei(Some(&EndpointId::from(1)), Some("12ab"))
            .await
            .unwrap_err();
        assert!(matches!(err, WidelyError::InvalidParam { .. }));
        assert_eq!(api.call_count(), 0);

        service(&api)
            .lock_imei(Some(&EndpointId::from(1)), Some("356938035643809"))
            .await
            .unwrap();
        assert_eq!(api.calls.lock()[0].0, "prov_update_mobile");
    }

    #[tokio::test]
    async fn freeze_and_unfreeze_share_function() {
        let api = Arc::new(RecordingApi::default());
        let svc = service(&api);
        let id = EndpointId::from(3);
        svc.set_frozen(Some(&id), true).await.unwrap();
        svc.set_frozen(Some(&id), false).await.unwrap();
        let calls = api.calls.lock();
        assert_eq!(calls[0].1["action"], json!("freeze"));
        assert_eq!(calls[1].1["action"], json!("unfreeze"));
        assert!(calls.iter().all(|(f, _)| f == "freeze_unfreeze_endpoint"));
    }

    #[tokio::test]
    async fn change_package_requires_package_id() {
        let api = Arc::new(RecordingApi::default());
        let err = service(&api)
            .change_package(Some(&EndpointId::from(3)), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("package_id"));

        service(&api)
            .change_package(Some(&EndpointId::from(3)), Some(12))
            .await
            .unwrap();
        let calls = api.calls.lock();
        assert_eq!(calls[0].0, "prov_update_mobile_subscription");
        assert_eq!(calls[0].1["package_id"], json!(12));
    }

    #[tokio::test]
    async fn terminate_and_voicemail_route_through_dispatcher() {
        let api = Arc::new(RecordingApi::default());
        let svc = service(&api);
        let id = EndpointId::from("900");
        svc.terminate_mobile(Some(&id)).await.unwrap();
        svc.reset_voicemail_pin(Some(&id)).await.unwrap();
        svc.send_apn(Some(&id)).await.unwrap();
        svc.unlock_imei(Some(&id)).await.unwrap();
        let calls = api.calls.lock();
        assert_eq!(calls[0].0, "prov_terminate_mobile");
        assert_eq!(calls[1].1["action"], json!("prov_reset_vm_pincode"));
        assert_eq!(calls[2].1["action"], json!("send_apn"));
        assert_eq!(calls[3].1["lock_imei"], json!(false));
    }
}
