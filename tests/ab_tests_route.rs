use marketing_api::abtest::AbTestService;
use marketing_api::models::ApiResponse;
use marketing_api::routes::api_routes;
use marketing_api::test_support::{TestDatabase, TestFixtures, TestRocketBuilder};
use rocket::http::{ContentType, Header, Status};
use serde_json::{Value, json};

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {}", token))
}

#[tokio::test]
async fn split_must_sum_to_one_hundred() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping A/B test integration test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);
    let (_, token) = fixtures
        .user_with_token("marketer@example.com", "user")
        .await
        .expect("insert user");
    let campaign_id = fixtures.insert_campaign("Spring sale").await.expect("campaign");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let lopsided = json!({
        "campaignId": campaign_id,
        "variants": [
            {"label": "A", "subject": "Hello", "splitPercentage": 60.0},
            {"label": "B", "subject": "Hi there", "splitPercentage": 30.0}
        ]
    });
    let response = client
        .post("/api/v1/ab-tests")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(lopsided.to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);

    let balanced = json!({
        "campaignId": campaign_id,
        "variants": [
            {"label": "A", "subject": "Hello", "splitPercentage": 50.0},
            {"label": "B", "subject": "Hi there", "splitPercentage": 50.0}
        ]
    });
    let response = client
        .post("/api/v1/ab-tests")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(balanced.to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    // A second test on the same campaign conflicts.
    let response = client
        .post("/api/v1/ab-tests")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(balanced.to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Conflict);

    let response = client
        .get(format!("/api/v1/ab-tests/{campaign_id}"))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let payload: ApiResponse<Value> = response.into_json().await.expect("summary");
    assert_eq!(payload.data["variants"].as_array().map(Vec::len), Some(2));

    test_db.close().await.expect("failed to drop test database");
}

async fn create_test(
    client: &rocket::local::asynchronous::Client,
    token: &str,
    body: Value,
) -> Value {
    let response = client
        .post("/api/v1/ab-tests")
        .header(bearer(token))
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let payload: ApiResponse<Value> = response.into_json().await.expect("summary");
    payload.data
}

fn variant_id(summary: &Value, label: &str) -> i64 {
    summary["variants"]
        .as_array()
        .and_then(|variants| variants.iter().find(|v| v["label"] == label))
        .and_then(|v| v["id"].as_i64())
        .expect("variant present")
}

#[tokio::test]
async fn send_then_pick_winner_by_conversions() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping A/B test integration test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);
    let (_, token) = fixtures
        .user_with_token("marketer@example.com", "user")
        .await
        .expect("insert user");
    let campaign_id = fixtures.insert_campaign("Autumn sale").await.expect("campaign");
    for i in 0..10 {
        fixtures
            .insert_subscriber(&format!("reader{i}@example.org"), "active")
            .await
            .expect("insert subscriber");
    }
    fixtures
        .insert_subscriber("gone@example.org", "unsubscribed")
        .await
        .expect("insert unsubscribed");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let summary = create_test(
        &client,
        &token,
        json!({
            "campaignId": campaign_id,
            "variants": [
                {"label": "A", "subject": "Hello", "splitPercentage": 50.0},
                {"label": "B", "subject": "Last chance", "content": "<p>B</p>", "splitPercentage": 50.0}
            ]
        }),
    )
    .await;
    let (a, b) = (variant_id(&summary, "A"), variant_id(&summary, "B"));

    let response = client
        .post(format!("/api/v1/ab-tests/{campaign_id}/send"))
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body("{}")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let sent: ApiResponse<Value> = response.into_json().await.expect("send summary");
    assert_eq!(sent.data["totalRecipients"], 10);
    let per_variant: Vec<i64> = sent.data["variants"]
        .as_array()
        .expect("assignments")
        .iter()
        .filter_map(|v| v["recipients"].as_i64())
        .collect();
    assert_eq!(per_variant, vec![5, 5]);

    let tracked: Vec<(i32, i64)> = sqlx::query_as(
        "SELECT variant_id, COUNT(*) FROM email_tracking WHERE campaign_id = $1 \
         GROUP BY variant_id ORDER BY variant_id",
    )
    .bind(campaign_id)
    .fetch_all(&pool)
    .await
    .expect("tracking rows");
    assert_eq!(tracked, vec![(a as i32, 5), (b as i32, 5)]);
    let unsent: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM email_tracking WHERE email = 'gone@example.org'",
    )
    .fetch_one(&pool)
    .await
    .expect("count inactive");
    assert_eq!(unsent, 0);

    // Already running, so it can't be sent twice.
    let response = client
        .post(format!("/api/v1/ab-tests/{campaign_id}/send"))
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body("{}")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Conflict);

    // A opens more, B converts more; with no criterion given, conversions decide.
    for (variant, event, count) in [(a, "open", 4), (b, "open", 1), (b, "conversion", 2)] {
        let response = client
            .post(format!("/api/v1/ab-tests/{campaign_id}/variants/{variant}/events"))
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(json!({"event": event, "count": count}).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }

    let response = client
        .post(format!("/api/v1/ab-tests/{campaign_id}/winner"))
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body("{}")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let decided: ApiResponse<Value> = response.into_json().await.expect("winner summary");
    let campaign = &decided.data["campaign"];
    assert_eq!(campaign["testStatus"], "completed");
    assert_eq!(campaign["selectedWinnerId"].as_i64(), Some(b));
    assert_eq!(campaign["subject"], "Last chance");
    assert_eq!(campaign["content"], "<p>B</p>");

    let statuses: Vec<(String, String)> = sqlx::query_as(
        "SELECT label, status FROM campaign_variants WHERE campaign_id = $1 ORDER BY label",
    )
    .bind(campaign_id)
    .fetch_all(&pool)
    .await
    .expect("variant statuses");
    assert_eq!(
        statuses,
        vec![
            ("A".to_string(), "loser".to_string()),
            ("B".to_string(), "winner".to_string())
        ]
    );

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn auto_selection_only_decides_tests_that_ran_their_course() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping A/B test integration test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);
    let (_, token) = fixtures
        .user_with_token("marketer@example.com", "user")
        .await
        .expect("insert user");
    let due = fixtures.insert_campaign("Finished test").await.expect("campaign");
    let fresh = fixtures.insert_campaign("Fresh test").await.expect("campaign");
    for i in 0..4 {
        fixtures
            .insert_subscriber(&format!("reader{i}@example.org"), "active")
            .await
            .expect("insert subscriber");
    }

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let mut click_leader = 0;
    for campaign_id in [due, fresh] {
        let summary = create_test(
            &client,
            &token,
            json!({
                "campaignId": campaign_id,
                "winnerCriteria": "click_rate",
                "autoSelectWinner": true,
                "testDurationHours": 1,
                "minSampleSize": 1,
                "variants": [
                    {"label": "A", "subject": "One", "splitPercentage": 50.0},
                    {"label": "B", "subject": "Two", "splitPercentage": 50.0}
                ]
            }),
        )
        .await;
        if campaign_id == due {
            click_leader = variant_id(&summary, "B");
        }

        let response = client
            .post(format!("/api/v1/ab-tests/{campaign_id}/send"))
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body("{}")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }

    let response = client
        .post(format!("/api/v1/ab-tests/{due}/variants/{click_leader}/events"))
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(json!({"event": "click"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    sqlx::query("UPDATE campaigns SET sent_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(due)
        .execute(&pool)
        .await
        .expect("backdate send");

    let ab_tests = client
        .rocket()
        .state::<AbTestService>()
        .expect("A/B test service is managed");
    let selected = ab_tests.auto_select_winners().await.expect("auto selection");
    assert_eq!(selected, vec![due]);

    let (status, winner): (Option<String>, Option<i32>) = sqlx::query_as(
        "SELECT test_status, selected_winner_id FROM campaigns WHERE id = $1",
    )
    .bind(due)
    .fetch_one(&pool)
    .await
    .expect("decided campaign");
    assert_eq!(status.as_deref(), Some("completed"));
    assert_eq!(winner.map(i64::from), Some(click_leader));

    let still_running: Option<String> =
        sqlx::query_scalar("SELECT test_status FROM campaigns WHERE id = $1")
            .bind(fresh)
            .fetch_one(&pool)
            .await
            .expect("fresh campaign");
    assert_eq!(still_running.as_deref(), Some("testing"));

    // Nothing left to decide on a second pass.
    assert!(ab_tests.auto_select_winners().await.expect("second pass").is_empty());

    test_db.close().await.expect("failed to drop test database");
}
