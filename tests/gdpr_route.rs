use marketing_api::models::ApiResponse;
use marketing_api::routes::api_routes;
use marketing_api::test_support::{TestDatabase, TestFixtures, TestRocketBuilder};
use rocket::http::{ContentType, Header, Status};
use serde_json::{Value, json};

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {}", token))
}

#[tokio::test]
async fn erasure_with_retained_statistics_anonymises_the_subscriber() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping GDPR integration test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);
    let (_, token) = fixtures
        .user_with_token("dpo@example.com", "admin")
        .await
        .expect("insert user");

    let subscriber_id = fixtures
        .insert_subscriber("grace@example.org", "active")
        .await
        .expect("insert subscriber");
    sqlx::query(
        "UPDATE subscribers SET first_name = 'Grace', last_name = 'Hopper', phone = '+1 555 0100', \
         sent = 12, opens = 7, clicks = 3 WHERE id = $1",
    )
    .bind(subscriber_id)
    .execute(&pool)
    .await
    .expect("seed subscriber details");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let response = client
        .post("/api/v1/gdpr/consent")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(
            json!({
                "email": "grace@example.org",
                "consentType": "email_marketing",
                "consentMethod": "double_opt_in",
                "legalBasis": "consent",
                "purposes": ["newsletter"]
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let response = client
        .post("/api/v1/gdpr/requests/erasure")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(json!({"email": "grace@example.org", "retainStatistics": true}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let payload: ApiResponse<Value> = response.into_json().await.expect("request payload");
    assert_eq!(payload.data["requestType"], "erasure");
    assert_eq!(payload.data["status"], "completed");

    let row: (String, Option<String>, Option<String>, Option<String>, i32, i32, i32, bool) =
        sqlx::query_as(
            "SELECT email, first_name, last_name, phone, sent, opens, clicks, anonymized_at IS NOT NULL \
             FROM subscribers WHERE id = $1",
        )
        .bind(subscriber_id)
        .fetch_one(&pool)
        .await
        .expect("subscriber row kept");
    let (email, first_name, last_name, phone, sent, opens, clicks, anonymized) = row;
    assert_ne!(email, "grace@example.org");
    assert_ne!(first_name.as_deref(), Some("Grace"));
    assert_ne!(last_name.as_deref(), Some("Hopper"));
    assert_ne!(phone.as_deref(), Some("+1 555 0100"));
    assert_eq!((sent, opens, clicks), (12, 7, 3));
    assert!(anonymized);

    let response = client
        .get("/api/v1/gdpr/consent?email=grace%40example.org&consent_type=email_marketing")
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let payload: ApiResponse<Value> = response.into_json().await.expect("consent payload");
    assert_eq!(payload.data["hasValidConsent"], false);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn erasure_scrubs_earlier_subject_request_answers() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping GDPR integration test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);
    let (_, token) = fixtures
        .user_with_token("dpo@example.com", "admin")
        .await
        .expect("insert user");

    let subscriber_id = fixtures
        .insert_subscriber("grace@example.org", "active")
        .await
        .expect("insert subscriber");
    sqlx::query(
        "UPDATE subscribers SET first_name = 'Grace', last_name = 'Hopper', phone = '+1 555 0100' \
         WHERE id = $1",
    )
    .bind(subscriber_id)
    .execute(&pool)
    .await
    .expect("seed subscriber details");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    for kind in ["access", "portability"] {
        let response = client
            .post(format!("/api/v1/gdpr/requests/{kind}"))
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(json!({"email": "grace@example.org"}).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.expect("request body");
        assert!(body.contains("Hopper"), "{kind} answer carries the data");
    }

    let response = client
        .post("/api/v1/gdpr/requests/erasure")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(json!({"email": "grace@example.org", "retainStatistics": true}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let response = client
        .get("/api/v1/gdpr/requests?size=50")
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body = response.into_string().await.expect("request list");
    for identifier in ["grace@example.org", "Grace", "Hopper", "+1 555 0100"] {
        assert!(!body.contains(identifier), "'{identifier}' survived erasure");
    }

    let (total, anonymised): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE email LIKE '%@anonymized.invalid') \
         FROM data_subject_requests",
    )
    .fetch_one(&pool)
    .await
    .expect("count requests");
    assert_eq!(total, 3);
    assert_eq!(anonymised, 3);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn erasure_without_statistics_deletes_subscriber_and_consents() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping GDPR integration test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);
    let (_, token) = fixtures
        .user_with_token("dpo@example.com", "admin")
        .await
        .expect("insert user");
    fixtures
        .insert_subscriber("ada@example.org", "active")
        .await
        .expect("insert subscriber");
    fixtures
        .insert_subscriber("keep@example.org", "active")
        .await
        .expect("insert bystander");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    for email in ["ada@example.org", "keep@example.org"] {
        let response = client
            .post("/api/v1/gdpr/consent")
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": email,
                    "consentType": "email_marketing",
                    "consentMethod": "double_opt_in",
                    "legalBasis": "consent"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }

    let response = client
        .post("/api/v1/gdpr/requests/erasure")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(json!({"email": "ada@example.org", "retainStatistics": false}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let payload: ApiResponse<Value> = response.into_json().await.expect("request payload");
    assert_eq!(payload.data["status"], "completed");

    let subscribers: Vec<(String,)> = sqlx::query_as("SELECT email FROM subscribers ORDER BY id")
        .fetch_all(&pool)
        .await
        .expect("list subscribers");
    assert_eq!(subscribers, vec![("keep@example.org".to_string(),)]);

    let consents: Vec<(String,)> = sqlx::query_as("SELECT email FROM consent_records ORDER BY id")
        .fetch_all(&pool)
        .await
        .expect("list consents");
    assert_eq!(consents, vec![("keep@example.org".to_string(),)]);

    test_db.close().await.expect("failed to drop test database");
}
