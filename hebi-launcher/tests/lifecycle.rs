#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{self, Request, StatusCode};
use hebi_launcher::fedid::Fedid;
use hebi_launcher::testing::{FakeOrchestrator, FakePod, StaticDirectory, staff_record, test_conf};
use hebi_launcher::{LauncherState, make_http_service, reaper};
use http_body_util::BodyExt as _;
use tower::ServiceExt as _;

fn fedid(s: &str) -> Fedid {
    s.parse().unwrap()
}

fn make_state(
    orchestrator: Arc<FakeOrchestrator>,
    directory: StaticDirectory,
) -> (LauncherState, hebi_task::ShutdownHandle) {
    LauncherState::mock(test_conf(), orchestrator, Arc::new(directory))
}

async fn get_json(
    app: &axum::Router,
    uri: &str,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap();

    (status, json)
}

#[tokio::test]
async fn invalid_user_is_refused_without_touching_the_orchestrator() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let directory = StaticDirectory::with_record(fedid("abc12345"), staff_record(0));
    let (state, _handle) = make_state(Arc::clone(&orchestrator), directory);

    let app = make_http_service(state);
    let (status, body) = get_json(&app, "/k8s/start_hebi?fedid=abc12345").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["was_session_launched"], false);
    assert_eq!(
        body["message"],
        "Invalid user, see user_ldap_info for more info"
    );
    assert_eq!(body["user_ldap_info"]["is_uid_root"], true);

    assert!(orchestrator.calls().is_empty(), "no orchestrator calls expected");
}

#[tokio::test]
async fn unknown_user_surfaces_a_directory_diagnostic() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let (state, _handle) = make_state(Arc::clone(&orchestrator), StaticDirectory::default());

    let app = make_http_service(state);
    let (status, body) = get_json(&app, "/k8s/start_hebi?fedid=ghost99").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["was_session_launched"], false);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("directory lookup failed"), "{message}");
    assert!(orchestrator.calls().is_empty());
}

#[tokio::test]
async fn start_provisions_service_ingress_and_deployment() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let directory = StaticDirectory::with_record(fedid("abc12345"), staff_record(10234));
    let (state, _handle) = make_state(Arc::clone(&orchestrator), directory);

    let app = make_http_service(state);
    let (status, body) = get_json(&app, "/k8s/start_hebi?fedid=abc12345").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["was_session_launched"], true);
    assert_eq!(body["is_hebi_pod_running"], true);

    assert!(orchestrator.has_pod(&fedid("abc12345")));
    assert!(orchestrator.has_service(&fedid("abc12345")));
    assert_eq!(
        orchestrator.ingress_paths(),
        vec!["/abc12345(/|$)(.*)".to_owned()]
    );
    assert_eq!(
        orchestrator.calls(),
        vec!["create_service", "patch_ingress", "create_deployment"]
    );
}

#[tokio::test]
async fn double_start_is_idempotent() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let directory = StaticDirectory::with_record(fedid("abc12345"), staff_record(10234));
    let (state, _handle) = make_state(Arc::clone(&orchestrator), directory);

    let app = make_http_service(state);

    let (_, body) = get_json(&app, "/k8s/start_hebi?fedid=abc12345").await;
    assert_eq!(body["was_session_launched"], true);
    let calls_after_first = orchestrator.create_calls();

    let (_, body) = get_json(&app, "/k8s/start_hebi?fedid=abc12345").await;
    assert_eq!(body["was_session_launched"], false);
    assert_eq!(body["is_hebi_pod_running"], true);
    assert_eq!(body["message"], "session exists");

    assert_eq!(
        orchestrator.create_calls(),
        calls_after_first,
        "second start must not create anything"
    );
    assert_eq!(orchestrator.ingress_paths().len(), 1, "route stays unique");
}

#[tokio::test]
async fn stop_on_an_absent_session_has_no_side_effects() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let (state, _handle) = make_state(Arc::clone(&orchestrator), StaticDirectory::default());

    let app = make_http_service(state);
    let (status, body) = get_json(&app, "/k8s/stop_hebi?fedid=ghost99").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["was_session_stopped"], false);
    assert_eq!(body["did_session_exist"], false);

    // The deployment delete is attempted, short-circuits on NotFound, and
    // nothing else is touched.
    assert_eq!(orchestrator.calls(), vec!["delete_deployment"]);
}

#[tokio::test]
async fn stop_tears_down_everything_in_order() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let directory = StaticDirectory::with_record(fedid("abc12345"), staff_record(10234));
    let (state, _handle) = make_state(Arc::clone(&orchestrator), directory);

    let app = make_http_service(state.clone());

    get_json(&app, "/k8s/start_hebi?fedid=abc12345").await;
    state.activity.touch(&fedid("abc12345"));

    let (_, body) = get_json(&app, "/k8s/stop_hebi?fedid=abc12345").await;
    assert_eq!(body["was_session_stopped"], true);
    assert_eq!(body["did_session_exist"], true);

    assert!(!orchestrator.has_pod(&fedid("abc12345")));
    assert!(!orchestrator.has_service(&fedid("abc12345")));
    assert!(orchestrator.ingress_paths().is_empty());
    assert_eq!(state.activity.get(&fedid("abc12345")), None);
}

#[tokio::test]
async fn pod_ready_timeout_rolls_back_the_partial_session() {
    let orchestrator = Arc::new(FakeOrchestrator::with_stuck_pods());
    let directory = StaticDirectory::with_record(fedid("abc12345"), staff_record(10234));

    let mut conf = test_conf();
    conf.pod_ready_timeout = Duration::from_millis(50);
    let (state, _handle) = LauncherState::mock(
        conf,
        Arc::clone(&orchestrator) as Arc<dyn hebi_launcher::kubernetes::Orchestrator>,
        Arc::new(directory),
    );

    let app = make_http_service(state);
    let (status, body) = get_json(&app, "/k8s/start_hebi?fedid=abc12345").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["was_session_launched"], false);
    assert_eq!(body["message"], "pod did not become ready");

    assert!(!orchestrator.has_pod(&fedid("abc12345")), "rollback deletes the pod");
    assert!(!orchestrator.has_service(&fedid("abc12345")));
    assert!(orchestrator.ingress_paths().is_empty());
}

#[tokio::test]
async fn reaper_destroys_sessions_beyond_the_threshold() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let directory = StaticDirectory::with_record(fedid("abc12345"), staff_record(10234));
    let (state, _handle) = make_state(Arc::clone(&orchestrator), directory);

    let app = make_http_service(state.clone());
    get_json(&app, "/k8s/start_hebi?fedid=abc12345").await;

    let threshold = test_conf().inactivity_threshold;
    let stale = time::OffsetDateTime::now_utc()
        - time::Duration::try_from(threshold).unwrap()
        - time::Duration::seconds(1);
    state.activity.touch_at(fedid("abc12345"), stale);

    reaper::reap_once(&state).await.unwrap();

    assert!(!orchestrator.has_pod(&fedid("abc12345")));
    assert!(!orchestrator.has_service(&fedid("abc12345")));
    assert!(orchestrator.ingress_paths().is_empty());
    assert_eq!(state.activity.get(&fedid("abc12345")), None);
}

#[tokio::test]
async fn reaper_spares_sessions_with_recent_activity() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let directory = StaticDirectory::with_record(fedid("abc12345"), staff_record(10234));
    let (state, _handle) = make_state(Arc::clone(&orchestrator), directory);

    let app = make_http_service(state.clone());
    get_json(&app, "/k8s/start_hebi?fedid=abc12345").await;
    state.activity.touch(&fedid("abc12345"));

    reaper::reap_once(&state).await.unwrap();

    assert!(orchestrator.has_pod(&fedid("abc12345")));
    assert!(orchestrator.has_service(&fedid("abc12345")));
}

#[tokio::test]
async fn reaper_never_destroys_a_session_without_an_activity_record() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    orchestrator.insert_pod(
        fedid("abc12345"),
        FakePod {
            running: true,
            deleting: false,
        },
    );
    let (state, _handle) = make_state(Arc::clone(&orchestrator), StaticDirectory::default());

    reaper::reap_once(&state).await.unwrap();

    assert!(orchestrator.has_pod(&fedid("abc12345")), "absence of signal is not inactivity");
    assert!(
        !orchestrator.calls().iter().any(|call| call.starts_with("delete")),
        "no destroy step may run"
    );
}

#[tokio::test]
async fn session_info_reflects_running_state() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let directory = StaticDirectory::with_record(fedid("abc12345"), staff_record(10234));
    let (state, _handle) = make_state(Arc::clone(&orchestrator), directory);

    let app = make_http_service(state);

    let (_, body) = get_json(&app, "/k8s/session_info?fedid=abc12345").await;
    assert_eq!(body["username"], "abc12345");
    assert_eq!(body["is_session_currently_running"], false);

    get_json(&app, "/k8s/start_hebi?fedid=abc12345").await;

    let (_, body) = get_json(&app, "/k8s/session_info?fedid=abc12345").await;
    assert_eq!(body["is_session_currently_running"], true);
}

#[tokio::test]
async fn pods_being_deleted_do_not_count_as_running() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    orchestrator.insert_pod(
        fedid("abc12345"),
        FakePod {
            running: true,
            deleting: true,
        },
    );
    let (state, _handle) = make_state(Arc::clone(&orchestrator), StaticDirectory::default());

    let app = make_http_service(state);
    let (_, body) = get_json(&app, "/k8s/session_info?fedid=abc12345").await;

    assert_eq!(body["is_session_currently_running"], false);
}

#[tokio::test]
async fn identity_falls_back_to_the_session_token_cookie() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let (state, _handle) = make_state(Arc::clone(&orchestrator), StaticDirectory::default());

    let token = hebi_token::SessionToken::mint(&test_conf().jwt_key, "abc12345").unwrap();

    let response = make_http_service(state)
        .oneshot(
            Request::builder()
                .uri("/k8s/session_info")
                .header(http::header::COOKIE, format!("token={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["username"], "abc12345");
}

#[tokio::test]
async fn requests_without_any_identity_are_unauthorized() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let (state, _handle) = make_state(orchestrator, StaticDirectory::default());

    let response = make_http_service(state)
        .oneshot(
            Request::builder()
                .uri("/k8s/session_info")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_fedid_parameters_are_rejected() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let (state, _handle) = make_state(Arc::clone(&orchestrator), StaticDirectory::default());

    let response = make_http_service(state)
        .oneshot(
            Request::builder()
                .uri("/k8s/start_hebi?fedid=..%2Fetc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(orchestrator.calls().is_empty());
}

#[tokio::test]
async fn explicit_uid_parameter_overrides_the_directory_record() {
    let orchestrator = Arc::new(FakeOrchestrator::new());
    let directory = StaticDirectory::with_record(fedid("abc12345"), staff_record(10234));
    let (state, _handle) = make_state(Arc::clone(&orchestrator), directory);

    let app = make_http_service(state);
    let (_, body) = get_json(&app, "/k8s/start_hebi?fedid=abc12345&uid=20468").await;
    assert_eq!(body["was_session_launched"], true);

    let deployment = orchestrator.deployment(&fedid("abc12345")).expect("deployment submitted");
    let security = deployment
        .spec
        .and_then(|spec| spec.template.spec)
        .and_then(|pod| pod.security_context)
        .expect("security context rendered");

    assert_eq!(security.run_as_user, Some(20468));
    assert_eq!(security.run_as_group, Some(20468));
}
