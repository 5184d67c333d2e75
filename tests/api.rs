//! End-to-end: the router on an ephemeral port, driven through the bridges

use std::time::Duration;

use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use proposal_desk::app::AppState;
use proposal_desk::auth::UserRole;
use proposal_desk::bridge::{ApiClient, CustomerBridge, DashboardBridge, ProductBridge, ProposalBridge};
use proposal_desk::config::Config;
use proposal_desk::dashboard::Section;
use proposal_desk::http::build_router;
use proposal_desk::http::middleware::{sign_jwt, JwtClaims};
use proposal_desk::services::customers::{CreateContact, CreateCustomer, CustomerFilter, CustomerStatus};
use proposal_desk::services::products::CreateProduct;
use proposal_desk::services::proposals::{ProposalItemInput, ProposalStatus, UpdateProposal};
use proposal_desk::wizard::{ProposalWizard, WizardDraft, WizardStep};
use proposal_desk::ErrorCode;

struct TestServer {
    base_url: String,
    secret: String,
}

impl TestServer {
    async fn start() -> Self {
        let config = Config::for_tests();
        let secret = config.jwt_secret.clone();
        let router = build_router(AppState::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            secret,
        }
    }

    fn client(&self, tenant_id: Uuid, role: UserRole) -> ApiClient {
        let claims = JwtClaims::new(Uuid::new_v4(), tenant_id, role, 3600);
        let token = sign_jwt(&claims, &self.secret).unwrap();
        ApiClient::new(&self.base_url)
            .unwrap()
            .with_token(token)
            .with_retry_delay(Duration::from_millis(10))
    }
}

fn customer(name: &str, email: &str) -> CreateCustomer {
    CreateCustomer {
        name: name.to_string(),
        email: email.to_string(),
        phone: None,
        company: Some(format!("{} Inc", name)),
        industry: None,
        status: CustomerStatus::Active,
        tags: vec![],
        notes: None,
    }
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::start().await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "test");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let server = TestServer::start().await;
    let anonymous = ApiClient::new(&server.base_url).unwrap();
    let err = anonymous
        .get::<serde_json::Value>("/api/customers")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn customer_email_is_unique_per_tenant() {
    let server = TestServer::start().await;
    let (tenant_a, tenant_b) = (Uuid::new_v4(), Uuid::new_v4());
    let a = CustomerBridge::new(server.client(tenant_a, UserRole::Sales), UserRole::Sales);
    let b = CustomerBridge::new(server.client(tenant_b, UserRole::Sales), UserRole::Sales);

    assert_ok!(a.create(&customer("Acme", "buyer@acme.test")).await);
    let err = assert_err!(a.create(&customer("Acme Again", "buyer@acme.test")).await);
    assert_eq!(err.code, ErrorCode::Conflict);

    // Same address in another tenant is fine
    assert_ok!(b.create(&customer("Acme", "buyer@acme.test")).await);

    let listing = assert_ok!(a.list(&CustomerFilter::default()).await);
    assert_eq!(listing.total, 1);
}

#[tokio::test]
async fn writes_invalidate_cached_reads() {
    let server = TestServer::start().await;
    let tenant = Uuid::new_v4();
    let bridge = CustomerBridge::new(server.client(tenant, UserRole::Sales), UserRole::Sales);

    let empty = bridge.list(&CustomerFilter::default()).await.unwrap();
    assert_eq!(empty.total, 0);
    assert_eq!(bridge.cache().cached_entries(), 1);

    let created = bridge.create(&customer("Globex", "ops@globex.test")).await.unwrap();
    let listing = bridge.list(&CustomerFilter::default()).await.unwrap();
    assert_eq!(listing.items[0].id, created.id);

    let first = bridge
        .add_contact(
            created.id,
            &CreateContact {
                name: "Hank".into(),
                email: None,
                phone: None,
                title: Some("Owner".into()),
                is_primary: false,
            },
        )
        .await
        .unwrap();
    assert!(first.is_primary, "first contact becomes primary");
}

#[tokio::test]
async fn viewers_are_stopped_before_the_request() {
    let server = TestServer::start().await;
    let bridge = CustomerBridge::new(
        server.client(Uuid::new_v4(), UserRole::Viewer),
        UserRole::Viewer,
    );
    let err = bridge
        .create(&customer("Initech", "peter@initech.test"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn proposal_lifecycle_through_the_wizard() {
    let server = TestServer::start().await;
    let tenant = Uuid::new_v4();

    let products = ProductBridge::new(server.client(tenant, UserRole::Manager), UserRole::Manager);
    let product = products
        .create(&CreateProduct {
            name: "Onboarding package".into(),
            sku: "onb-1".into(),
            description: None,
            category: Some("Services".into()),
            unit_price: 500.0,
            currency: "USD".into(),
        })
        .await
        .unwrap();
    assert_eq!(product.sku, "ONB-1");
    assert_eq!(products.categories().await.unwrap(), vec!["Services".to_string()]);

    let customers = CustomerBridge::new(server.client(tenant, UserRole::Sales), UserRole::Sales);
    let acme = customers.create(&customer("Acme", "buyer@acme.test")).await.unwrap();

    let sales = ProposalBridge::new(server.client(tenant, UserRole::Sales), UserRole::Sales);

    // The server agrees the empty draft is incomplete
    let check = sales.validate_draft(&WizardDraft::default()).await.unwrap();
    assert!(!check.valid);
    assert!(check.errors.contains_key(&WizardStep::Customer));

    let mut wizard = ProposalWizard::new();
    assert!(wizard.next_step().is_err());
    wizard.update_draft(|d| {
        d.customer_id = Some(acme.id);
        d.title = "Onboarding for Acme".into();
        d.items = vec![ProposalItemInput {
            product_id: product.id,
            description: None,
            quantity: 2.0,
            unit_price: None,
            discount_percent: 10.0,
        }];
    });
    while wizard.step() != WizardStep::Review {
        wizard.next_step().unwrap();
    }

    let detail = sales
        .create(&wizard.into_create_input().unwrap())
        .await
        .unwrap();
    assert_eq!(detail.proposal.status, ProposalStatus::Draft);
    assert_eq!(detail.proposal.total_value, 900.0);

    let updated = sales
        .update(
            detail.proposal.id,
            &UpdateProposal {
                title: Some("Onboarding for Acme (revised)".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.proposal.version, detail.proposal.version + 1);

    // Sales may submit but not approve
    let in_review = sales
        .update_status(detail.proposal.id, ProposalStatus::InReview)
        .await
        .unwrap();
    assert_eq!(in_review.status, ProposalStatus::InReview);
    let err = sales
        .update_status(detail.proposal.id, ProposalStatus::Approved)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Forbidden);

    let manager = ProposalBridge::new(server.client(tenant, UserRole::Manager), UserRole::Manager);
    let err = manager
        .update_status(detail.proposal.id, ProposalStatus::Won)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationFailed);
    manager
        .update_status(detail.proposal.id, ProposalStatus::Approved)
        .await
        .unwrap();

    // A quoted product cannot be removed from the catalog
    let err = products.delete(product.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Integrity);
}

#[tokio::test]
async fn dashboard_reports_each_section_separately() {
    let server = TestServer::start().await;
    let tenant = Uuid::new_v4();
    let api = server.client(tenant, UserRole::Sales);

    let customers = CustomerBridge::new(api.clone(), UserRole::Sales);
    customers.create(&customer("Acme", "buyer@acme.test")).await.unwrap();

    let dashboard = DashboardBridge::new(api, UserRole::Sales);
    let ctx = proposal_desk::auth::RequestContext::new(Uuid::new_v4(), tenant, UserRole::Sales);
    let data = dashboard.load(&ctx, &Section::ALL).await;

    assert_eq!(data.sections.len(), Section::ALL.len());
    // Analytics is not part of the tenant's plan
    assert_eq!(data.error(Section::Performance).unwrap().code, ErrorCode::Forbidden);
    assert_eq!(data.data(Section::Proposals).unwrap()["total"], 0);
    assert!(data.data(Section::Notifications).is_some());
    assert!(data.data(Section::Activities).unwrap()["items"].is_array());

    let remote = dashboard
        .load_remote(&[Section::Proposals, Section::Performance])
        .await
        .unwrap();
    assert_eq!(remote.sections.len(), 2);
    assert!(!remote.is_complete());
}

#[tokio::test]
async fn malformed_requests_get_the_error_envelope() {
    let server = TestServer::start().await;
    let tenant = Uuid::new_v4();
    let api = server.client(tenant, UserRole::Sales);

    let err = api
        .get::<serde_json::Value>("/api/customers/not-a-uuid")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationFailed);

    let err = api
        .get_with_query::<serde_json::Value, _>("/api/customers", &[("limit", "many")])
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationFailed);

    let token = sign_jwt(
        &JwtClaims::new(Uuid::new_v4(), tenant, UserRole::Sales, 3600),
        &server.secret,
    )
    .unwrap();
    let response = reqwest::Client::new()
        .post(format!("{}/api/customers", server.base_url))
        .bearer_auth(token)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 422);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION.FAILED");
    assert_eq!(body["error"]["metadata"]["component"], "Http");
}
