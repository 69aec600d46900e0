#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App, HttpResponse};
use agora::repo::inmem::InMemRepo;
use agora::{config, AppState, SecurityHeaders};
use std::sync::Arc;

fn state() -> web::Data<AppState> {
    web::Data::new(AppState::new(Arc::new(InMemRepo::new())))
}

#[actix_web::test]
async fn test_security_headers_present() {
    let app = test::init_service(App::new().wrap(SecurityHeaders::new(false)).app_data(state()).configure(config)).await;
    let req = test::TestRequest::get().uri("/api/communities").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let headers = resp.headers();
    assert!(headers.get("content-security-policy").is_some());
    assert_eq!(headers.get("referrer-policy").unwrap(), "no-referrer");
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("strict-transport-security").is_none()); // not enabled
}

#[actix_web::test]
async fn test_headers_on_error_responses() {
    let app = test::init_service(App::new().wrap(SecurityHeaders::new(false)).app_data(state()).configure(config)).await;
    let req = test::TestRequest::get().uri("/api/posts/ghost").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    assert!(resp.headers().get("content-security-policy").is_some());
}

#[actix_web::test]
async fn test_hsts_enabled() {
    let app = test::init_service(App::new().wrap(SecurityHeaders::new(true)).app_data(state()).configure(config)).await;
    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(resp.headers().get("strict-transport-security").is_some(), "HSTS header missing");
}

#[actix_web::test]
async fn test_existing_csp_header_preserved() {
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default())
            .route("/custom", web::get().to(|| async {
                HttpResponse::Ok()
                    .insert_header((actix_web::http::header::CONTENT_SECURITY_POLICY, "custom-src 'none'"))
                    .finish()
            })),
    )
    .await;
    let req = test::TestRequest::get().uri("/custom").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let csp = resp.headers().get("content-security-policy").unwrap().to_str().unwrap();
    assert_eq!(csp, "custom-src 'none'");
}
