use std::collections::BTreeMap;

use marketing_api::import::service::NewImport;
use marketing_api::import::{DuplicateHandling, ImportJob, ImportOptions, ImportService};
use marketing_api::jobs::{JobKind, JobQueue, JobStatus};
use marketing_api::models::ApiResponse;
use marketing_api::routes::api_routes;
use marketing_api::test_support::{TestDatabase, TestFixtures, TestRocketBuilder};
use rocket::http::{Header, Status};

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {}", token))
}

fn options() -> ImportOptions {
    let mut column_mapping = BTreeMap::new();
    column_mapping.insert("email".to_string(), "email".to_string());
    column_mapping.insert("first_name".to_string(), "firstName".to_string());
    ImportOptions {
        column_mapping,
        duplicate_handling: DuplicateHandling::Skip,
        validation_threshold: 50,
        batch_size: 2,
        group_ids: Vec::new(),
        segment_ids: Vec::new(),
        import_risky: false,
    }
}

#[tokio::test]
async fn import_runs_to_completion_and_cannot_be_cancelled_afterwards() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping import integration test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };
    let pool = test_db.pool_clone();
    let storage = tempfile::tempdir().expect("tempdir");

    let fixtures = TestFixtures::new(&pool);
    let (user_id, token) = fixtures
        .user_with_token("importer@example.com", "user")
        .await
        .expect("insert user");

    let csv_path = storage.path().join("subscribers.csv");
    std::fs::write(
        &csv_path,
        "email,first_name\nalice@example.org,Alice\nnot-an-email,Bob\nALICE@example.org,Again\n",
    )
    .expect("write csv");

    let imports = ImportService::new(pool.clone());
    let job = imports
        .create_job(NewImport {
            file_name: "subscribers.csv".into(),
            original_file_name: "subscribers.csv".into(),
            file_path: csv_path,
            total_records: 3,
            options: options(),
            user_id: Some(user_id),
        })
        .await
        .expect("create job");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress_percentage, 0);

    let status = imports.process_job(job.id).await.expect("process job");
    assert_eq!(status, JobStatus::Completed);

    let client = TestRocketBuilder::new()
        .storage_path(storage.path())
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let response = client
        .get(format!("/api/v1/email-marketing/import/jobs/{}", job.id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let payload: ApiResponse<ImportJob> = response.into_json().await.expect("job payload");
    let finished = payload.data;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.processed_records, 3);
    assert_eq!(finished.progress_percentage, 100);
    assert!(finished.invalid_records >= 1);
    assert!(finished.completed_at.is_some());

    let response = client
        .post(format!("/api/v1/email-marketing/import/jobs/{}/cancel", job.id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Conflict);

    let body: serde_json::Value = response.into_json().await.expect("error body");
    assert_eq!(body["success"], false);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn pending_import_can_be_cancelled() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping import integration test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };
    let pool = test_db.pool_clone();
    let storage = tempfile::tempdir().expect("tempdir");

    let (user_id, token) = TestFixtures::new(&pool)
        .user_with_token("canceller@example.com", "user")
        .await
        .expect("insert user");

    let imports = ImportService::new(pool.clone());
    let job = imports
        .create_job(NewImport {
            file_name: "pending.csv".into(),
            original_file_name: "pending.csv".into(),
            file_path: storage.path().join("pending.csv"),
            total_records: 0,
            options: options(),
            user_id: Some(user_id),
        })
        .await
        .expect("create job");

    let client = TestRocketBuilder::new()
        .storage_path(storage.path())
        .manage_pg_pool(pool.clone())
        .mount_api_routes(api_routes())
        .async_client()
        .await;

    let response = client
        .post(format!("/api/v1/email-marketing/import/jobs/{}/cancel", job.id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let payload: ApiResponse<ImportJob> = response.into_json().await.expect("job payload");
    assert_eq!(payload.data.status, JobStatus::Cancelled);

    let missing = client
        .get("/api/v1/email-marketing/import/jobs/999999")
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(missing.status(), Status::NotFound);

    test_db.close().await.expect("failed to drop test database");
}

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping import integration test: {err}");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

async fn import_file(
    imports: &ImportService,
    path: std::path::PathBuf,
    options: ImportOptions,
) -> ImportJob {
    imports
        .create_job(NewImport {
            file_name: "subscribers.csv".into(),
            original_file_name: "subscribers.csv".into(),
            file_path: path,
            total_records: 0,
            options,
            user_id: None,
        })
        .await
        .expect("create job")
}

#[tokio::test]
async fn unreadable_row_is_recorded_as_invalid_in_place() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let storage = tempfile::tempdir().expect("tempdir");

    let csv_path = storage.path().join("mixed.csv");
    let mut bytes = b"email,first_name\na@example.org,Ann\nb@example.org,B".to_vec();
    bytes.extend_from_slice(&[0xff, 0xfe]);
    bytes.extend_from_slice(b"\nc@example.org,Cy\n");
    std::fs::write(&csv_path, bytes).expect("write csv");

    let imports = ImportService::new(pool.clone());
    let job = import_file(&imports, csv_path, options()).await;
    let status = imports.process_job(job.id).await.expect("process job");
    assert_eq!(status, JobStatus::Completed);

    let finished = imports.get_job(job.id).await.expect("job");
    assert_eq!(finished.total_records, 3);
    assert_eq!(finished.processed_records, 3);
    assert_eq!(finished.invalid_records, 1);
    assert_eq!(finished.imported_records, 2);

    let results: Vec<(i32, String, Vec<String>)> = sqlx::query_as(
        "SELECT row_number, status, issues FROM import_results WHERE import_job_id = $1 ORDER BY row_number",
    )
    .bind(job.id)
    .fetch_all(&pool)
    .await
    .expect("import results");
    let rows: Vec<(i32, &str)> = results.iter().map(|(n, s, _)| (*n, s.as_str())).collect();
    assert_eq!(rows, vec![(1, "valid"), (2, "invalid"), (3, "valid")]);
    assert!(results[1].2.iter().any(|issue| issue.contains("UTF-8")));

    let imported: Vec<(String,)> = sqlx::query_as("SELECT email FROM subscribers ORDER BY email")
        .fetch_all(&pool)
        .await
        .expect("subscribers");
    assert_eq!(
        imported,
        vec![("a@example.org".to_string(),), ("c@example.org".to_string(),)]
    );

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn duplicate_handling_updates_or_replaces_existing_subscribers() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let storage = tempfile::tempdir().expect("tempdir");
    let imports = ImportService::new(pool.clone());

    let csv_path = storage.path().join("known.csv");
    std::fs::write(&csv_path, "email,first_name,last_name\nKnown@Example.org,Newname,\n")
        .expect("write csv");

    for (handling, expected) in [
        (
            DuplicateHandling::Update,
            (Some("Newname"), Some("Person"), Some("Acme"), vec![1, 2]),
        ),
        (
            DuplicateHandling::Replace,
            (Some("Newname"), None, None, vec![2]),
        ),
    ] {
        test_db.reset().await.expect("reset tables");
        sqlx::query(
            "INSERT INTO subscribers (email, first_name, last_name, company, group_ids) \
             VALUES ('known@example.org', 'Old', 'Person', 'Acme', '{1}')",
        )
        .execute(&pool)
        .await
        .expect("seed subscriber");
        for name in ["Regulars", "Imported"] {
            sqlx::query("INSERT INTO subscriber_groups (name) VALUES ($1)")
                .bind(name)
                .execute(&pool)
                .await
                .expect("seed group");
        }

        let mut opts = options();
        opts.column_mapping
            .insert("last_name".to_string(), "lastName".to_string());
        opts.duplicate_handling = handling;
        opts.group_ids = vec![2];

        let job = import_file(&imports, csv_path.clone(), opts).await;
        let status = imports.process_job(job.id).await.expect("process job");
        assert_eq!(status, JobStatus::Completed);

        let finished = imports.get_job(job.id).await.expect("job");
        assert_eq!(finished.duplicate_records, 1, "{handling:?}");
        assert_eq!(finished.imported_records, 1, "{handling:?}");

        let row: (Option<String>, Option<String>, Option<String>, Vec<i32>) = sqlx::query_as(
            "SELECT first_name, last_name, company, group_ids FROM subscribers WHERE email = 'known@example.org'",
        )
        .fetch_one(&pool)
        .await
        .expect("subscriber row");
        let (first, last, company, mut groups) = row;
        groups.sort_unstable();
        let (want_first, want_last, want_company, want_groups) = expected;
        assert_eq!(first.as_deref(), want_first, "{handling:?}");
        assert_eq!(last.as_deref(), want_last, "{handling:?}");
        assert_eq!(company.as_deref(), want_company, "{handling:?}");
        assert_eq!(groups, want_groups, "{handling:?}");
    }

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn cancelling_mid_batch_rolls_the_batch_back() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let storage = tempfile::tempdir().expect("tempdir");

    let csv_path = storage.path().join("slow.csv");
    std::fs::write(&csv_path, "email,first_name\nfirst@example.org,One\nsecond@example.org,Two\n")
        .expect("write csv");

    let imports = ImportService::new(pool.clone());
    let job = import_file(&imports, csv_path, options()).await;
    let queue = JobQueue::new(pool.clone());
    assert!(queue.start_job(JobKind::Import, job.id).await.expect("start job"));

    // Hold result writes so the worker stalls inside its first batch.
    let mut gate = pool.begin().await.expect("begin");
    sqlx::query("LOCK TABLE import_results IN EXCLUSIVE MODE")
        .execute(&mut *gate)
        .await
        .expect("lock results");

    let job_id = job.id;
    let worker = {
        let imports = imports.clone();
        tokio::spawn(async move { imports.run_claimed(job_id).await })
    };

    let mut waiting = false;
    for _ in 0..200 {
        let blocked: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pg_locks WHERE NOT granted AND relation = 'import_results'::regclass",
        )
        .fetch_one(&pool)
        .await
        .expect("inspect locks");
        if blocked > 0 {
            waiting = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    assert!(waiting, "worker never reached the results insert");

    queue
        .cancel_job(JobKind::Import, job.id)
        .await
        .expect("cancel processing job");
    gate.rollback().await.expect("release lock");

    let status = worker.await.expect("worker task").expect("run job");
    assert_eq!(status, JobStatus::Cancelled);

    let cancelled = imports.get_job(job.id).await.expect("job");
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.processed_records, 0);

    let (results, subscribers): (i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM import_results), (SELECT COUNT(*) FROM subscribers)",
    )
    .fetch_one(&pool)
    .await
    .expect("count rows");
    assert_eq!((results, subscribers), (0, 0));

    test_db.close().await.expect("failed to drop test database");
}
