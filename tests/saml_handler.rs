//! Integration tests for the Matrixon SAML2 identity mapping
//!
//! Every scenario runs once with a mapping provider registered through the
//! module API and once with a legacy direct-method provider.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use futures::FutureExt;
use matrixon_sso::{
    build_saml_handler,
    core::{AttributeRequirement, IdentityAssertion, MappingError, SsoRequest, UserAttributes},
    test_utils::{MemoryIdentifierStore, RecordingCompletion, RecordingReporter},
    Collaborators, Config, LegacyProviderRegistry, LegacySamlMappingProvider, MappingOutcome,
    ModuleApi, RejectionReason, Result, SamlAttributes, SamlHandler, SamlMappingCallbacks, SsoOutcome,
};
use ruma::UserId;
use test_log::test;

const CUSTOM_REDIRECT: &str = "https://custom-saml-redirect/";

#[derive(Debug, Clone, Copy)]
enum Style {
    Callbacks,
    Legacy,
}

const STYLES: [Style; 2] = [Style::Callbacks, Style::Legacy];

/// Where the test provider sends the client instead of mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Redirect {
    #[default]
    Never,
    FromRemoteUserId,
    FromUserAttributes,
}

fn remote_user_id(assertion: &IdentityAssertion, redirect: Redirect) -> Result<MappingOutcome<String>> {
    if redirect == Redirect::FromRemoteUserId {
        return Ok(MappingOutcome::Redirect(CUSTOM_REDIRECT.to_string()));
    }
    assertion
        .first_value("uid")
        .map(|uid| MappingOutcome::Mapped(uid.to_string()))
        .ok_or_else(|| MappingError::MissingAttribute("uid".to_string()).into())
}

fn username_attributes(assertion: &IdentityAssertion) -> MappingOutcome<UserAttributes> {
    MappingOutcome::Mapped(UserAttributes {
        localpart: assertion.first_value("username").map(str::to_string),
        ..Default::default()
    })
}

fn saml_attributes() -> SamlAttributes {
    SamlAttributes::new(["uid"], ["displayName"])
}

struct LegacyUsernameProvider {
    redirect: Redirect,
}

impl LegacySamlMappingProvider for LegacyUsernameProvider {
    fn get_remote_user_id(&self, assertion: &IdentityAssertion, _: Option<&str>) -> Result<MappingOutcome<String>> {
        remote_user_id(assertion, self.redirect)
    }

    fn saml_response_to_user_attributes(
        &self,
        assertion: &IdentityAssertion,
        _failures: u32,
        _client_redirect_url: &str,
    ) -> Result<MappingOutcome<UserAttributes>> {
        if self.redirect == Redirect::FromUserAttributes {
            return Ok(MappingOutcome::Redirect(CUSTOM_REDIRECT.to_string()));
        }
        Ok(username_attributes(assertion))
    }

    fn saml_attributes(&self) -> SamlAttributes {
        saml_attributes()
    }
}

fn legacy_username_provider(_: &serde_json::Value) -> Result<Box<dyn LegacySamlMappingProvider>> {
    Ok(Box::new(LegacyUsernameProvider {
        redirect: Redirect::Never,
    }))
}

fn legacy_redirect_provider(_: &serde_json::Value) -> Result<Box<dyn LegacySamlMappingProvider>> {
    Ok(Box::new(LegacyUsernameProvider {
        redirect: Redirect::FromUserAttributes,
    }))
}

fn legacy_remote_redirect_provider(_: &serde_json::Value) -> Result<Box<dyn LegacySamlMappingProvider>> {
    Ok(Box::new(LegacyUsernameProvider {
        redirect: Redirect::FromRemoteUserId,
    }))
}

/// Callback provider; `attribute_calls` counts attribute mapper invocations
fn callbacks(redirect: Redirect, attribute_calls: Arc<AtomicUsize>) -> SamlMappingCallbacks {
    SamlMappingCallbacks {
        get_remote_user_id: Arc::new(move |assertion: IdentityAssertion, _url: Option<String>| {
            async move { remote_user_id(&assertion, redirect) }.boxed()
        }),
        saml_response_to_user_attributes: Arc::new(move |assertion: IdentityAssertion, _url: String| {
            attribute_calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if redirect == Redirect::FromUserAttributes {
                    return Ok(MappingOutcome::Redirect(CUSTOM_REDIRECT.to_string()));
                }
                Ok(username_attributes(&assertion))
            }
            .boxed()
        }),
        saml_attributes: saml_attributes(),
    }
}

struct Harness {
    store: Arc<MemoryIdentifierStore>,
    completion: Arc<RecordingCompletion>,
    reporter: Arc<RecordingReporter>,
    handler: SamlHandler,
    attribute_calls: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Options {
    redirect: Redirect,
    grandfather: bool,
    requirements: Vec<AttributeRequirement>,
}

impl Harness {
    async fn new(style: Style) -> Self {
        Self::with_options(style, Options::default()).await
    }

    async fn with_options(style: Style, options: Options) -> Self {
        let mut config = Config {
            server_name: "test".to_string(),
            ..Default::default()
        };
        config.saml2.max_mapping_retries = 3;
        config.saml2.attribute_requirements = options.requirements;
        if options.grandfather {
            config.saml2.grandfathered_mxid_source_attribute = Some("mxid".to_string());
        }

        let module_api = ModuleApi::new();
        let mut legacy = LegacyProviderRegistry::new();
        legacy
            .register("tests.LegacyTestMappingProvider", legacy_username_provider)
            .register("tests.LegacyTestRedirectMappingProvider", legacy_redirect_provider)
            .register("tests.LegacyTestRemoteRedirectMappingProvider", legacy_remote_redirect_provider);

        let attribute_calls = Arc::new(AtomicUsize::new(0));
        match style {
            Style::Callbacks => module_api
                .register_saml2_user_mapping_provider_callbacks(callbacks(options.redirect, attribute_calls.clone()))
                .unwrap(),
            Style::Legacy => {
                let module = match options.redirect {
                    Redirect::Never => "tests.LegacyTestMappingProvider",
                    Redirect::FromUserAttributes => "tests.LegacyTestRedirectMappingProvider",
                    Redirect::FromRemoteUserId => "tests.LegacyTestRemoteRedirectMappingProvider",
                };
                config.saml2.user_mapping_provider.module = Some(module.to_string());
            }
        }

        let store = Arc::new(MemoryIdentifierStore::new());
        let completion = Arc::new(RecordingCompletion::new());
        let reporter = Arc::new(RecordingReporter::new());
        let collaborators = Collaborators {
            store: store.clone(),
            completion: completion.clone(),
            reporter: reporter.clone(),
        };
        let handler = build_saml_handler(&config, collaborators, &module_api, &legacy)
            .await
            .unwrap();

        Self {
            store,
            completion,
            reporter,
            handler,
            attribute_calls,
        }
    }

    async fn handle(&self, request: &SsoRequest, assertion: &IdentityAssertion, redirect: &str) -> SsoOutcome {
        self.handler
            .handle_authn_response(request, assertion, redirect)
            .await
            .unwrap()
    }

    async fn assert_logged_in(&self, request: &SsoRequest, user_id: &str, redirect: &str, new_user: bool) {
        let logins = self.completion.logins().await;
        assert_eq!(logins.len(), 1, "expected exactly one login, got {:?}", logins);
        assert_eq!(logins[0].user_id.as_str(), user_id);
        assert_eq!(logins[0].auth_provider, "saml");
        assert_eq!(logins[0].request_id, request.id);
        assert_eq!(logins[0].client_redirect_url, redirect);
        assert_eq!(logins[0].session_token, None);
        assert_eq!(logins[0].new_user, new_user);
    }
}

#[test(tokio::test)]
async fn test_requested_attributes() {
    for style in STYLES {
        let harness = Harness::new(style).await;
        assert_eq!(harness.handler.requested_attributes(), saml_attributes(), "{:?}", style);
    }
}

#[test(tokio::test)]
async fn test_map_saml_response_to_user() {
    for style in STYLES {
        let harness = Harness::new(style).await;
        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([("uid", vec!["test_user"]), ("username", vec!["test_user"])]);

        let outcome = harness.handle(&request, &assertion, "redirect_uri").await;

        match outcome {
            SsoOutcome::Completed(identity) => {
                assert_eq!(identity.user_id.as_str(), "@test_user:test");
                assert!(identity.new_user);
            }
            other => panic!("{:?}: unexpected outcome {:?}", style, other),
        }
        harness
            .assert_logged_in(&request, "@test_user:test", "redirect_uri", true)
            .await;
        assert!(harness.reporter.errors().is_empty());
    }
}

#[test(tokio::test)]
async fn test_map_saml_response_to_existing_user() {
    for style in STYLES {
        let harness = Harness::with_options(
            style,
            Options {
                grandfather: true,
                ..Default::default()
            },
        )
        .await;
        harness.store.register("@test_user:test").await.unwrap();

        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([
            ("uid", vec!["tester"]),
            ("mxid", vec!["test_user"]),
            ("username", vec!["test_user"]),
        ]);

        harness.handle(&request, &assertion, "").await;
        harness.assert_logged_in(&request, "@test_user:test", "", false).await;

        // Subsequent calls should map to the same mxid.
        harness.completion.reset().await;
        harness.handle(&request, &assertion, "").await;
        harness.assert_logged_in(&request, "@test_user:test", "", false).await;

        assert_eq!(harness.store.user_count().await, 1);
        assert_eq!(
            harness.store.binding("saml", "tester").await,
            Some(UserId::parse("@test_user:test").unwrap())
        );
    }
}

#[test(tokio::test)]
async fn test_repeat_login_reuses_new_account() {
    for style in STYLES {
        let harness = Harness::new(style).await;
        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([("uid", vec!["remote"]), ("username", vec!["test_user"])]);

        harness.handle(&request, &assertion, "").await;
        harness.completion.reset().await;
        harness.handle(&request, &assertion, "").await;

        harness.assert_logged_in(&request, "@test_user:test", "", false).await;
        assert_eq!(harness.store.user_count().await, 1);
    }
}

#[test(tokio::test)]
async fn test_map_saml_response_to_invalid_localpart() {
    for style in STYLES {
        let harness = Harness::new(style).await;
        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([("uid", vec!["test"]), ("username", vec!["föö"])]);

        let outcome = harness.handle(&request, &assertion, "").await;

        assert_eq!(
            outcome,
            SsoOutcome::Rejected(RejectionReason::InvalidLocalpart("föö".to_string()))
        );
        let errors = harness.reporter.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].request_id, request.id);
        assert_eq!(errors[0].error, "mapping_error");
        assert_eq!(errors[0].error_description, "localpart is invalid: föö");
        assert!(harness.completion.logins().await.is_empty());
        assert_eq!(harness.store.user_count().await, 0);
    }
}

#[test(tokio::test)]
async fn test_map_saml_response_to_user_retries() {
    for style in STYLES {
        let harness = Harness::new(style).await;

        // register a user to occupy the first-choice MXID
        harness.store.register("@test_user:test").await.unwrap();

        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([("uid", vec!["test"]), ("username", vec!["test_user"])]);
        harness.handle(&request, &assertion, "").await;

        // test_user is already taken, so test_user1 gets registered instead.
        harness.assert_logged_in(&request, "@test_user1:test", "", true).await;
        harness.completion.reset().await;

        // Register all of the potential mxids for a particular SAML username.
        for user_id in ["@tester:test", "@tester1:test", "@tester2:test"] {
            harness.store.register(user_id).await.unwrap();
        }

        let assertion = IdentityAssertion::new([("uid", vec!["tester"]), ("username", vec!["tester"])]);
        let outcome = harness.handle(&request, &assertion, "").await;

        assert_eq!(outcome, SsoOutcome::Rejected(RejectionReason::Exhausted));
        let errors = harness.reporter.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error, "mapping_error");
        assert_eq!(
            errors[0].error_description,
            "Unable to generate a Matrix ID from the SSO response"
        );
        assert!(harness.completion.logins().await.is_empty());
    }
}

#[test(tokio::test)]
async fn test_map_saml_response_redirect() {
    for style in STYLES {
        let harness = Harness::with_options(
            style,
            Options {
                redirect: Redirect::FromUserAttributes,
                ..Default::default()
            },
        )
        .await;
        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([("uid", vec!["test"]), ("username", vec!["test_user"])]);

        let outcome = harness.handle(&request, &assertion, "").await;

        assert_eq!(outcome, SsoOutcome::Redirected(CUSTOM_REDIRECT.to_string()));
        assert!(harness.completion.logins().await.is_empty());
        assert!(harness.reporter.errors().is_empty());
        assert_eq!(harness.store.user_count().await, 0);
    }
}

#[test(tokio::test)]
async fn test_attribute_requirements() {
    for style in STYLES {
        let harness = Harness::with_options(
            style,
            Options {
                requirements: vec![
                    AttributeRequirement::new("userGroup", "staff"),
                    AttributeRequirement::new("department", "sales"),
                ],
                ..Default::default()
            },
        )
        .await;

        // The response doesn't have the proper userGroup or department.
        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([("uid", vec!["test_user"]), ("username", vec!["test_user"])]);
        let outcome = harness.handle(&request, &assertion, "redirect_uri").await;
        assert_eq!(outcome, SsoOutcome::Rejected(RejectionReason::RequirementsNotMet));
        assert!(harness.completion.logins().await.is_empty());

        // The response doesn't have the proper department.
        let assertion = IdentityAssertion::new([
            ("uid", vec!["test_user"]),
            ("username", vec!["test_user"]),
            ("userGroup", vec!["staff"]),
        ]);
        let outcome = harness.handle(&request, &assertion, "redirect_uri").await;
        assert_eq!(outcome, SsoOutcome::Rejected(RejectionReason::RequirementsNotMet));
        assert!(harness.completion.logins().await.is_empty());
        assert!(harness.reporter.errors().is_empty());

        // Add the proper attributes and it should succeed.
        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([
            ("uid", vec!["test_user"]),
            ("username", vec!["test_user"]),
            ("userGroup", vec!["staff", "admin"]),
            ("department", vec!["sales"]),
        ]);
        harness.handle(&request, &assertion, "redirect_uri").await;
        harness
            .assert_logged_in(&request, "@test_user:test", "redirect_uri", true)
            .await;
    }
}

#[test(tokio::test)]
async fn test_missing_remote_user_id() {
    for style in STYLES {
        let harness = Harness::new(style).await;
        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([("username", vec!["test_user"])]);

        let outcome = harness.handle(&request, &assertion, "").await;

        assert!(matches!(outcome, SsoOutcome::Rejected(RejectionReason::MappingFailed(_))));
        let errors = harness.reporter.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_description, "'uid' not in SAML2 response");
        assert!(harness.completion.logins().await.is_empty());
    }
}

#[test(tokio::test)]
async fn test_outstanding_request_becomes_session_token() {
    for style in STYLES {
        let harness = Harness::new(style).await;
        let request_id = harness.handler.register_outstanding_request(None).await;

        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([("uid", vec!["test_user"]), ("username", vec!["test_user"])])
            .with_in_response_to(request_id.clone());
        harness.handle(&request, &assertion, "redirect_uri").await;

        let logins = harness.completion.logins().await;
        assert_eq!(logins.len(), 1);
        assert_eq!(logins[0].session_token.as_deref(), Some(request_id.as_str()));
        assert!(harness.handler.outstanding_requests().is_empty().await);
    }
}

#[test(tokio::test)]
async fn test_ui_auth_response() {
    for style in STYLES {
        let harness = Harness::with_options(
            style,
            Options {
                requirements: vec![AttributeRequirement::new("userGroup", "staff")],
                ..Default::default()
            },
        )
        .await;
        let request_id = harness
            .handler
            .register_outstanding_request(Some("ui_session".to_string()))
            .await;

        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([("uid", vec!["tester"]), ("username", vec!["test_user"])])
            .with_in_response_to(request_id);
        let outcome = harness.handle(&request, &assertion, "").await;

        assert_eq!(
            outcome,
            SsoOutcome::UiAuthCompleted {
                remote_user_id: "tester".to_string()
            }
        );
        let ui_auths = harness.completion.ui_auths().await;
        assert_eq!(ui_auths.len(), 1);
        assert_eq!(ui_auths[0].auth_provider, "saml");
        assert_eq!(ui_auths[0].remote_user_id, "tester");
        assert_eq!(ui_auths[0].ui_auth_session_id, "ui_session");
        assert_eq!(ui_auths[0].request_id, request.id);
        assert!(harness.completion.logins().await.is_empty());
        assert_eq!(harness.store.user_count().await, 0);
    }
}

#[test(tokio::test)]
async fn test_unknown_in_response_to_is_a_plain_login() {
    for style in STYLES {
        let harness = Harness::new(style).await;
        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([("uid", vec!["test_user"]), ("username", vec!["test_user"])])
            .with_in_response_to("saml_req_unknown");

        harness.handle(&request, &assertion, "redirect_uri").await;
        harness
            .assert_logged_in(&request, "@test_user:test", "redirect_uri", true)
            .await;
    }
}

#[test(tokio::test)]
async fn test_map_saml_response_redirect_from_remote_user_id() {
    for style in STYLES {
        let harness = Harness::with_options(
            style,
            Options {
                redirect: Redirect::FromRemoteUserId,
                ..Default::default()
            },
        )
        .await;
        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([("uid", vec!["test"]), ("username", vec!["test_user"])]);

        let outcome = harness.handle(&request, &assertion, "").await;

        assert_eq!(outcome, SsoOutcome::Redirected(CUSTOM_REDIRECT.to_string()), "{:?}", style);
        assert!(harness.completion.logins().await.is_empty());
        assert!(harness.reporter.errors().is_empty());
        assert_eq!(harness.store.user_count().await, 0);

        // A UI-auth response redirects the same way
        let request_id = harness
            .handler
            .register_outstanding_request(Some("ui_session".to_string()))
            .await;
        let outcome = harness
            .handle(&request, &assertion.clone().with_in_response_to(request_id), "")
            .await;
        assert_eq!(outcome, SsoOutcome::Redirected(CUSTOM_REDIRECT.to_string()));
        assert!(harness.completion.ui_auths().await.is_empty());
    }
}

#[test(tokio::test)]
async fn test_grandfathered_user_keeps_registered_case() {
    for style in STYLES {
        let harness = Harness::with_options(
            style,
            Options {
                grandfather: true,
                ..Default::default()
            },
        )
        .await;
        harness.store.register("@Test_User:test").await.unwrap();

        let request = SsoRequest::default();
        let assertion = IdentityAssertion::new([
            ("uid", vec!["tester"]),
            ("mxid", vec!["Test_User"]),
            ("username", vec!["test_user"]),
        ]);

        harness.handle(&request, &assertion, "").await;
        harness.assert_logged_in(&request, "@Test_User:test", "", false).await;
        assert_eq!(harness.store.user_count().await, 1);
        assert_eq!(
            harness.store.binding("saml", "tester").await,
            Some(UserId::parse("@Test_User:test").unwrap())
        );
    }
}

#[test(tokio::test)]
async fn test_attribute_mapper_runs_once_per_assertion() {
    let harness = Harness::new(Style::Callbacks).await;
    harness.store.register("@test_user:test").await.unwrap();
    harness.store.register("@test_user1:test").await.unwrap();

    let request = SsoRequest::default();
    let assertion = IdentityAssertion::new([("uid", vec!["test"]), ("username", vec!["test_user"])]);
    harness.handle(&request, &assertion, "").await;

    harness.assert_logged_in(&request, "@test_user2:test", "", true).await;
    assert_eq!(harness.attribute_calls.load(Ordering::SeqCst), 1);

    // A repeat login finds the binding and never asks for attributes
    harness.completion.reset().await;
    harness.handle(&request, &assertion, "").await;
    harness.assert_logged_in(&request, "@test_user2:test", "", false).await;
    assert_eq!(harness.attribute_calls.load(Ordering::SeqCst), 1);
}
