use marketing_api::export::{ExportJob, ExportPreview, ExportService};
use marketing_api::jobs::{JobKind, JobQueue, JobStatus};
use marketing_api::models::ApiResponse;
use marketing_api::routes::api_routes;
use marketing_api::test_support::{TestDatabase, TestFixtures, TestRocketBuilder};
use rocket::http::{ContentType, Header, Status};

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {}", token))
}

#[tokio::test]
async fn export_of_active_subscribers_completes_with_all_rows() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping export integration test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };
    let pool = test_db.pool_clone();
    let storage = tempfile::tempdir().expect("tempdir");

    let fixtures = TestFixtures::new(&pool);
    let (_, token) = fixtures
        .user_with_token("exporter@example.com", "user")
        .await
        .expect("insert user");
    for i in 0..10 {
        fixtures
            .insert_subscriber(&format!("active{i}@example.org"), "active")
            .await
            .expect("insert active subscriber");
    }
    for i in 0..3 {
        fixtures
            .insert_subscriber(&format!("bounced{i}@example.org"), "bounced")
            .await
            .expect("insert bounced subscriber");
    }

    let client = TestRocketBuilder::new()
        .storage_path(storage.path())
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let response = client
        .post("/api/v1/email-marketing/export")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "filters": {"status": ["active"]},
                "options": {"format": "csv", "fields": ["email", "firstName", "status", "opens"]}
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let created: ApiResponse<ExportJob> = response.into_json().await.expect("job payload");
    let job_id = created.data.id;
    assert_eq!(created.data.status, JobStatus::Pending);

    // Not finished yet, so there is nothing to download.
    let early = client
        .get(format!("/api/v1/email-marketing/export/jobs/{job_id}/download"))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(early.status(), Status::BadRequest);

    let exports = client
        .rocket()
        .state::<ExportService>()
        .expect("export service is managed");
    let status = exports.process_job(job_id).await.expect("process export");
    assert_eq!(status, JobStatus::Completed);

    let response = client
        .get(format!("/api/v1/email-marketing/export/jobs/{job_id}"))
        .header(bearer(&token))
        .dispatch()
        .await;
    let finished: ApiResponse<ExportJob> = response.into_json().await.expect("job payload");
    assert_eq!(finished.data.status, JobStatus::Completed);
    assert_eq!(finished.data.total_records, 10);
    assert_eq!(finished.data.processed_records, 10);
    assert_eq!(finished.data.progress_percentage, 100);

    let download = client
        .get(format!("/api/v1/email-marketing/export/jobs/{job_id}/download"))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(download.status(), Status::Ok);
    let body = download.into_string().await.expect("csv body");
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 11, "header plus ten rows");
    assert!(lines.iter().skip(1).all(|line| line.contains("active")));
    assert!(!body.contains("bounced"));

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn export_with_unknown_group_is_rejected() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping export integration test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };
    let pool = test_db.pool_clone();
    let (_, token) = TestFixtures::new(&pool)
        .user_with_token("exporter@example.com", "user")
        .await
        .expect("insert user");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let response = client
        .post("/api/v1/email-marketing/export")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "filters": {"groupIds": [4242]},
                "options": {"fields": ["email"]}
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);

    test_db.close().await.expect("failed to drop test database");
}

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping export integration test: {err}");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

async fn queue_export(
    client: &rocket::local::asynchronous::Client,
    token: &str,
    body: serde_json::Value,
) -> ExportJob {
    let response = client
        .post("/api/v1/email-marketing/export")
        .header(bearer(token))
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let created: ApiResponse<ExportJob> = response.into_json().await.expect("job payload");
    created.data
}

#[tokio::test]
async fn export_matching_nobody_completes_at_zero_progress() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let storage = tempfile::tempdir().expect("tempdir");
    let (_, token) = TestFixtures::new(&pool)
        .user_with_token("exporter@example.com", "user")
        .await
        .expect("insert user");

    let client = TestRocketBuilder::new()
        .storage_path(storage.path())
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let job = queue_export(
        &client,
        &token,
        serde_json::json!({"filters": {"status": ["bounced"]}, "options": {"fields": ["email"]}}),
    )
    .await;
    let exports = client
        .rocket()
        .state::<ExportService>()
        .expect("export service is managed");
    let status = exports.process_job(job.id).await.expect("process export");
    assert_eq!(status, JobStatus::Completed);

    let finished = exports.get_job(job.id).await.expect("job");
    assert_eq!(finished.total_records, 0);
    assert_eq!(finished.processed_records, 0);
    assert_eq!(finished.progress_percentage, 0);

    let download = client
        .get(format!("/api/v1/email-marketing/export/jobs/{}/download", job.id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(download.status(), Status::Ok);
    let body = download.into_string().await.expect("csv body");
    assert_eq!(body.lines().count(), 1, "header only");

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn withdrawn_and_erased_subscribers_are_never_exported() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let storage = tempfile::tempdir().expect("tempdir");
    let fixtures = TestFixtures::new(&pool);
    let (_, token) = fixtures
        .user_with_token("exporter@example.com", "admin")
        .await
        .expect("insert user");
    for email in ["stays@example.org", "withdrew@example.org", "returned@example.org", "erased@example.org"] {
        fixtures
            .insert_subscriber(email, "active")
            .await
            .expect("insert subscriber");
    }

    let client = TestRocketBuilder::new()
        .storage_path(storage.path())
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let consent = |email: &str| {
        serde_json::json!({
            "email": email,
            "consentType": "email_marketing",
            "consentMethod": "explicit_opt_in",
            "legalBasis": "consent"
        })
        .to_string()
    };
    for email in ["withdrew@example.org", "returned@example.org"] {
        let response = client
            .post("/api/v1/gdpr/consent")
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(consent(email))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let response = client
            .post("/api/v1/gdpr/consent/withdraw")
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(
                serde_json::json!({"email": email, "consentType": "email_marketing"}).to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }
    // Consenting again after a withdrawal makes the subscriber exportable.
    let response = client
        .post("/api/v1/gdpr/consent")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(consent("returned@example.org"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let response = client
        .post("/api/v1/gdpr/requests/erasure")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(serde_json::json!({"email": "erased@example.org"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let request = serde_json::json!({"options": {"fields": ["email", "status"]}});
    let response = client
        .post("/api/v1/email-marketing/export/preview")
        .header(bearer(&token))
        .header(ContentType::JSON)
        .body(request.to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let preview: ApiResponse<ExportPreview> = response.into_json().await.expect("preview");
    assert_eq!(preview.data.total_subscribers, 2);
    assert_eq!(preview.data.estimated_file_size_bytes, 80);

    let job = queue_export(&client, &token, request).await;
    let exports = client
        .rocket()
        .state::<ExportService>()
        .expect("export service is managed");
    assert_eq!(
        exports.process_job(job.id).await.expect("process export"),
        JobStatus::Completed
    );

    let body = client
        .get(format!("/api/v1/email-marketing/export/jobs/{}/download", job.id))
        .header(bearer(&token))
        .dispatch()
        .await
        .into_string()
        .await
        .expect("csv body");
    assert!(body.contains("stays@example.org"));
    assert!(body.contains("returned@example.org"));
    assert!(!body.contains("withdrew@example.org"));
    assert!(!body.contains("anonymized"));
    assert_eq!(body.lines().count(), 3);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn xlsx_export_downloads_a_workbook() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let storage = tempfile::tempdir().expect("tempdir");
    let fixtures = TestFixtures::new(&pool);
    let (_, token) = fixtures
        .user_with_token("exporter@example.com", "user")
        .await
        .expect("insert user");
    for i in 0..3 {
        fixtures
            .insert_subscriber(&format!("sheet{i}@example.org"), "active")
            .await
            .expect("insert subscriber");
    }

    let client = TestRocketBuilder::new()
        .storage_path(storage.path())
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let job = queue_export(
        &client,
        &token,
        serde_json::json!({
            "options": {"format": "xlsx", "fields": ["email", "status", "subscribedAt", "opens"]}
        }),
    )
    .await;
    assert!(job.file_name.ends_with(".xlsx"));

    let exports = client
        .rocket()
        .state::<ExportService>()
        .expect("export service is managed");
    assert_eq!(
        exports.process_job(job.id).await.expect("process export"),
        JobStatus::Completed
    );
    let finished = exports.get_job(job.id).await.expect("job");
    assert_eq!(finished.processed_records, 3);

    let download = client
        .get(format!("/api/v1/email-marketing/export/jobs/{}/download", job.id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(download.status(), Status::Ok);
    let content_type = download.content_type().map(|ct| ct.to_string()).unwrap_or_default();
    assert!(content_type.contains("spreadsheetml.sheet"), "{content_type}");
    let bytes = download.into_bytes().await.expect("xlsx body");
    assert!(bytes.starts_with(b"PK"), "xlsx files are zip archives");
    assert_eq!(Some(bytes.len() as i64), finished.file_size_bytes);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn export_cancelled_while_processing_leaves_no_file() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let storage = tempfile::tempdir().expect("tempdir");
    let fixtures = TestFixtures::new(&pool);
    let (_, token) = fixtures
        .user_with_token("exporter@example.com", "user")
        .await
        .expect("insert user");
    fixtures
        .insert_subscriber("someone@example.org", "active")
        .await
        .expect("insert subscriber");

    let client = TestRocketBuilder::new()
        .storage_path(storage.path())
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let job = queue_export(
        &client,
        &token,
        serde_json::json!({"options": {"fields": ["email"]}}),
    )
    .await;
    let exports = client
        .rocket()
        .state::<ExportService>()
        .expect("export service is managed");

    let queue = JobQueue::new(pool.clone());
    assert!(queue.start_job(JobKind::Export, job.id).await.expect("start job"));
    queue
        .cancel_job(JobKind::Export, job.id)
        .await
        .expect("cancel processing job");

    let status = exports.run_claimed(job.id).await.expect("run job");
    assert_eq!(status, JobStatus::Cancelled);

    let cancelled = exports.get_job(job.id).await.expect("job");
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(!std::path::Path::new(&cancelled.file_path).exists());
    let leftovers = std::fs::read_dir(storage.path().join("exports"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);

    test_db.close().await.expect("failed to drop test database");
}
