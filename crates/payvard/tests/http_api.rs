use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use payvar_config::{
    NarrativeProviderKind, PayvarConfig, config_path, ensure_workspace_config, load_workspace_config,
};
use payvar_infer::ProviderOverrides;
use payvar_store::MemoryStore;
use payvard::{PayrollService, router};
use rust_xlsxwriter::Workbook;
use serde_json::Value;
use tempfile::tempdir;
use tower::ServiceExt;

const JANUARY: &str = "Emp ID,Employee Name,Department,Basic,HRA,Bonus\n\
1001,Asha Rao,Engineering,50000,20000,0\n\
1002,Ravi Kumar,Engineering,60000,24000,5000\n\
1003,Meera Iyer,Finance,45000,18000,0\n";

const FEBRUARY: &str = "Emp ID,Employee Name,Department,Basic,HRA,Bonus\n\
1001,Asha Rao,Engineering,55000,20000,2000\n\
1002,Ravi Kumar,Engineering,60000,24000,5000\n\
1003,Meera Iyer,Finance,45000,18000,0\n";

fn app_with(config: PayvarConfig) -> Router {
    let service = PayrollService::from_config(
        Arc::new(MemoryStore::new()),
        &config,
        ProviderOverrides::default(),
    )
    .expect("service");
    router(Arc::new(service))
}

fn app() -> Router {
    let mut config = PayvarConfig::default();
    config.inference.provider = NarrativeProviderKind::Disabled;
    app_with(config)
}

const BOUNDARY: &str = "payvar-test-boundary";

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: &[u8],
) -> Result<(StatusCode, Vec<u8>, header::HeaderMap), Box<dyn std::error::Error>> {
    send_with(app, method, uri, "text/csv", body.to_vec()).await
}

async fn send_with(
    app: &Router,
    method: &str,
    uri: &str,
    content_type: &str,
    body: Vec<u8>,
) -> Result<(StatusCode, Vec<u8>, header::HeaderMap), Box<dyn std::error::Error>> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))?;
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, bytes.to_vec(), headers))
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    body: &[u8],
) -> Result<(StatusCode, Value), Box<dyn std::error::Error>> {
    let (status, bytes, _) = send(app, method, uri, body).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

fn multipart_body(field: &str, filename: &str, contents: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn send_multipart(
    app: &Router,
    uri: &str,
    body: Vec<u8>,
) -> Result<(StatusCode, Value), Box<dyn std::error::Error>> {
    let content_type = format!("multipart/form-data; boundary={BOUNDARY}");
    let (status, bytes, _) = send_with(app, "POST", uri, &content_type, body).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

fn january_workbook() -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, header) in ["Emp ID", "Employee Name", "Department", "Basic", "HRA", "Bonus"]
        .into_iter()
        .enumerate()
    {
        sheet.write_string(0, col as u16, header)?;
    }
    let rows = [
        (1001.0, "Asha Rao", "Engineering", 50000.0, 20000.0, 0.0),
        (1002.0, "Ravi Kumar", "Engineering", 60000.0, 24000.0, 5000.0),
        (1003.0, "Meera Iyer", "Finance", 45000.0, 18000.0, 0.0),
    ];
    for (index, (id, name, department, basic, hra, bonus)) in rows.into_iter().enumerate() {
        let row = index as u32 + 1;
        sheet.write_number(row, 0, id)?;
        sheet.write_string(row, 1, name)?;
        sheet.write_string(row, 2, department)?;
        sheet.write_number(row, 3, basic)?;
        sheet.write_number(row, 4, hra)?;
        sheet.write_number(row, 5, bonus)?;
    }
    Ok(workbook.save_to_buffer()?)
}

async fn seed(app: &Router) -> Result<(), Box<dyn std::error::Error>> {
    let (status, _) = send_json(app, "POST", "/upload/2024-01", JANUARY.as_bytes()).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_json(app, "POST", "/upload/2024-02", FEBRUARY.as_bytes()).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn upload_reports_detected_columns() -> Result<(), Box<dyn std::error::Error>> {
    let app = app();

    let (status, body) = send_json(&app, "POST", "/upload/2024-01", JANUARY.as_bytes()).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["period"], "2024-01");
    assert_eq!(body["uploaded_records"], 3);
    assert_eq!(body["columns_detected"]["Emp ID"], "employee_id");
    assert_eq!(body["columns_detected"]["Employee Name"], "name");
    assert_eq!(body["columns_detected"]["HRA"], "hra");

    let (status, health) = send_json(&app, "GET", "/health", b"").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["periods"][0], "2024-01");
    Ok(())
}

#[tokio::test]
async fn employee_variance_returns_figures_and_summary() -> Result<(), Box<dyn std::error::Error>> {
    let app = app();
    seed(&app).await?;

    let (status, body) = send_json(&app, "GET", "/variance/1001/2024-01/2024-02", b"").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["employee_id"], "1001");
    assert_eq!(body["name"], "Asha Rao");
    assert_eq!(body["variance"]["basic"]["difference"], 5000.0);
    assert_eq!(body["variance"]["basic"]["percent_change"], 10.0);
    assert!(body["variance"]["bonus"]["percent_change"].is_null());
    assert_eq!(body["variance"]["total_variance"]["difference"], 7000.0);
    assert_eq!(body["variance"]["total_variance"]["percent_change"], 10.0);
    assert_eq!(
        body["summary"],
        "Basic increased by 10.0% (\u{20b9}5,000). Hra decreased by 0.0% (\u{20b9}0). Bonus changed from \u{20b9}0 to \u{20b9}2,000."
    );
    assert_eq!(body["summary_source"], "deterministic");
    Ok(())
}

#[tokio::test]
async fn unknown_period_is_not_found_with_error_envelope() -> Result<(), Box<dyn std::error::Error>>
{
    let app = app();
    seed(&app).await?;

    let (status, body) = send_json(&app, "GET", "/variance/1001/2023-12/2024-02", b"").await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert!(
        body["detail"]
            .as_str()
            .is_some_and(|detail| detail.contains("2023-12"))
    );
    Ok(())
}

#[tokio::test]
async fn strict_baseline_turns_zero_total_into_validation_error()
-> Result<(), Box<dyn std::error::Error>> {
    let app = app();
    send_json(&app, "POST", "/upload/p1", b"id,bonus\n7,0\n").await?;
    send_json(&app, "POST", "/upload/p2", b"id,bonus\n7,900\n").await?;

    let (status, body) = send_json(&app, "GET", "/variance/7/p1/p2", b"").await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["variance"]["total_variance"]["percent_change"].is_null());

    let (status, body) =
        send_json(&app, "GET", "/variance/7/p1/p2?strict_baseline=true", b"").await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "zero_baseline");
    Ok(())
}

#[tokio::test]
async fn invalid_uploads_are_rejected_with_actionable_messages()
-> Result<(), Box<dyn std::error::Error>> {
    let app = app();

    let (status, body) = send_json(&app, "POST", "/upload/2024-01", b"PK\x03\x04rest").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
    assert!(body["detail"].as_str().is_some_and(|detail| detail.contains("workbook")));

    let (status, body) =
        send_json(&app, "POST", "/upload/2024-01", b"Name,Basic\nAsha,100\n").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["detail"]
            .as_str()
            .is_some_and(|detail| detail.contains("employee_id"))
    );

    let (status, _) = send_json(&app, "POST", "/upload/2024-01", b"").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, health) = send_json(&app, "GET", "/health", b"").await?;
    assert_eq!(health["periods"].as_array().map(Vec::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn workbook_and_multipart_uploads_are_accepted() -> Result<(), Box<dyn std::error::Error>> {
    let app = app();

    let workbook = january_workbook()?;
    let (status, body) =
        send_multipart(&app, "/upload/2024-01", multipart_body("file", "jan.xlsx", &workbook)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uploaded_records"], 3);
    assert_eq!(body["columns_detected"]["Emp ID"], "employee_id");

    let (status, body) = send_multipart(
        &app,
        "/upload/2024-02",
        multipart_body("file", "feb.csv", FEBRUARY.as_bytes()),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uploaded_records"], 3);

    let (status, body) = send_json(&app, "GET", "/variance/1001/2024-01/2024-02", b"").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["variance"]["basic"]["difference"], 5000.0);
    assert_eq!(body["variance"]["total_variance"]["difference"], 7000.0);

    let (status, body) = send_json(&app, "POST", "/upload/2024-03", &workbook).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uploaded_records"], 3);

    let (status, body) = send_multipart(
        &app,
        "/upload/2024-04",
        multipart_body("attachment", "feb.csv", FEBRUARY.as_bytes()),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().is_some_and(|detail| detail.contains("'file'")));
    Ok(())
}

#[tokio::test]
async fn rejected_requests_use_the_error_envelope() -> Result<(), Box<dyn std::error::Error>> {
    let app = app();
    seed(&app).await?;

    let (status, body) = send_json(
        &app,
        "GET",
        "/variance/1001/2024-01/2024-02?strict_baseline=maybe",
        b"",
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
    assert!(body["detail"].is_string());

    let (status, body) = send_json(&app, "GET", "/variance/%FF/2024-01/2024-02", b"").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");

    let oversized = vec![b'1'; 17 * 1024 * 1024];
    let (status, body) = send_json(&app, "POST", "/upload/2024-03", &oversized).await?;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "payload_too_large");
    assert!(body["detail"].is_string());
    Ok(())
}

#[tokio::test]
async fn department_variance_aggregates_groups() -> Result<(), Box<dyn std::error::Error>> {
    let app = app();
    seed(&app).await?;

    let (status, body) = send_json(&app, "GET", "/departments/variance/2024-01/2024-02", b"").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["group_field"], "department");
    assert_eq!(body["departments"][0]["group"], "Engineering");
    assert_eq!(body["departments"][0]["variance"]["basic"]["difference"], 5000.0);
    assert_eq!(body["departments"][1]["group"], "Finance");
    assert_eq!(
        body["departments"][1]["variance"]["total_variance"]["difference"],
        0.0
    );
    let summary = body["summary"].as_str().unwrap_or_default();
    assert!(summary.starts_with("Engineering: Basic increased by 4.5% (\u{20b9}5,000)."));
    assert!(summary.contains("Finance: Basic decreased by 0.0% (\u{20b9}0)."));
    Ok(())
}

#[tokio::test]
async fn report_downloads_pdf_with_period_filename() -> Result<(), Box<dyn std::error::Error>> {
    let app = app();
    seed(&app).await?;

    let (status, bytes, headers) = send(&app, "GET", "/report/2024-01/2024-02", b"").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"payroll_variance_2024-01_2024-02.pdf\""
    );
    assert!(bytes.starts_with(b"%PDF-1.4"));

    let (status, bytes, headers) =
        send(&app, "GET", "/report/2024-01/2024-02?format=json", b"").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    let report: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(report["rows"].as_array().map(Vec::len), Some(3));
    assert_eq!(report["columns"][0], "employee_id");

    let (status, body) =
        send_json(&app, "GET", "/report/2024-01/2024-02?format=xlsx", b"").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
    Ok(())
}

#[tokio::test]
async fn mock_provider_enriches_department_summaries_only() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = PayvarConfig::default();
    config.inference.provider = NarrativeProviderKind::Mock;
    let app = app_with(config);
    seed(&app).await?;

    let (status, body) = send_json(&app, "GET", "/departments/variance/2024-01/2024-02", b"").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary_source"], "enriched");
    assert_eq!(body["summary"], "Mock narrative covering 8 variance rows.");

    let (status, body) = send_json(&app, "GET", "/variance/1002/2024-01/2024-02", b"").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary_source"], "deterministic");
    Ok(())
}

#[tokio::test]
async fn workspace_config_drives_columns_and_provider() -> Result<(), Box<dyn std::error::Error>> {
    let workspace = tempdir()?;
    ensure_workspace_config(workspace.path())?;
    std::fs::write(
        config_path(workspace.path()),
        r#"[inference]
provider = "disabled"

[columns]
salary_anchor = "salary"
group_field = "team"

[[columns.aliases]]
label = "Staff No"
field = "employee_id"

[[columns.aliases]]
label = "Squad"
field = "team"
"#,
    )?;
    let app = app_with(load_workspace_config(workspace.path())?);

    send_json(&app, "POST", "/upload/q1", b"Staff No,Squad,Gross Salary\n1,Core,100\n").await?;
    send_json(&app, "POST", "/upload/q2", b"Staff No,Squad,Gross Salary\n1,Core,150\n").await?;

    let (status, body) = send_json(&app, "GET", "/departments/variance/q1/q2", b"").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["group_field"], "team");
    assert_eq!(body["departments"][0]["group"], "Core");
    assert_eq!(body["departments"][0]["variance"]["salary"]["percent_change"], 50.0);
    assert_eq!(body["summary"], "Core: Salary increased by 50.0% (\u{20b9}50).");
    Ok(())
}
