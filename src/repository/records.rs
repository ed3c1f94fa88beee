//! Diesel ORM records for database tables.
//!
//! These provide compile-time type checking for database operations. The
//! domain types in `crate::models` are built from these raw rows.

use std::collections::BTreeMap;

use diesel::prelude::*;

use super::parse_datetime;
use crate::models::{Run, RunStatus, TestStatus, UrlTestDetail, UrlTestSummary};
use crate::schema;

/// Run row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RunRecord {
    pub id: i64,
    pub uuid: String,
    pub run_timestamp: String,
    pub total_urls: i64,
    pub parallel_workers: i64,
    pub duration_ms: Option<i64>,
    pub tests_completed: i64,
    pub passed: i64,
    pub failed: i64,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl RunRecord {
    /// Convert to the domain type. Unknown status text maps to FAILED so a
    /// hand-edited row cannot masquerade as an open run.
    #[must_use]
    pub fn into_run(self) -> Run {
        Run {
            id: self.id,
            uuid: self.uuid,
            run_timestamp: parse_datetime(&self.run_timestamp),
            total_urls: self.total_urls,
            parallel_workers: self.parallel_workers,
            duration_ms: self.duration_ms,
            tests_completed: self.tests_completed,
            passed: self.passed,
            failed: self.failed,
            status: RunStatus::parse(&self.status).unwrap_or(RunStatus::Failed),
            notes: self.notes,
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        }
    }
}

/// New run for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::runs)]
pub struct NewRun<'a> {
    pub uuid: &'a str,
    pub run_timestamp: &'a str,
    pub total_urls: i64,
    pub parallel_workers: i64,
    pub status: &'a str,
    pub notes: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// URL test row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::url_tests)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UrlTestRecord {
    pub id: i64,
    pub uuid: String,
    pub test_run_id: i64,
    pub test_timestamp: String,
    pub url: String,
    pub domain: String,
    pub browser: String,
    pub user_agent: String,
    pub page_title: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub test_duration_ms: i64,
    pub scroll_duration_ms: i64,
    pub dns_lookup_ms: Option<f64>,
    pub tcp_connection_ms: Option<f64>,
    pub tls_negotiation_ms: Option<f64>,
    pub time_to_first_byte_ms: Option<f64>,
    pub response_time_ms: Option<f64>,
    pub dom_content_loaded_ms: Option<f64>,
    pub dom_interactive_ms: Option<f64>,
    pub total_page_load_ms: Option<f64>,
    pub doc_transfer_size: Option<i64>,
    pub doc_encoded_size: Option<i64>,
    pub doc_decoded_size: Option<i64>,
    pub total_resources: i64,
    pub total_transfer_size: i64,
    pub total_encoded_size: i64,
    pub resources_by_type: String,
    pub http_response_codes: String,
    pub screenshot_path: String,
    pub har_path: String,
    pub created_at: String,
}

impl UrlTestRecord {
    /// Summary projection joined with the owning run's timestamp.
    #[must_use]
    pub fn into_summary(self, run_timestamp: &str) -> UrlTestSummary {
        UrlTestSummary {
            id: self.id,
            uuid: self.uuid,
            test_run_id: self.test_run_id,
            run_timestamp: parse_datetime(run_timestamp),
            test_timestamp: parse_datetime(&self.test_timestamp),
            url: self.url,
            domain: self.domain,
            status: TestStatus::parse(&self.status).unwrap_or(TestStatus::Error),
            page_title: self.page_title,
            total_page_load_ms: self.total_page_load_ms,
            time_to_first_byte_ms: self.time_to_first_byte_ms,
            test_duration_ms: self.test_duration_ms,
            error_message: self.error_message,
            screenshot_path: self.screenshot_path,
            har_path: self.har_path,
        }
    }

    /// Full detail projection joined with the owning run's timestamp.
    #[must_use]
    pub fn into_detail(self, run_timestamp: &str) -> UrlTestDetail {
        let resources_by_type: BTreeMap<String, i64> =
            serde_json::from_str(&self.resources_by_type).unwrap_or_default();
        let http_response_codes: BTreeMap<u16, i64> =
            serde_json::from_str(&self.http_response_codes).unwrap_or_default();

        UrlTestDetail {
            id: self.id,
            uuid: self.uuid,
            test_run_id: self.test_run_id,
            run_timestamp: parse_datetime(run_timestamp),
            test_timestamp: parse_datetime(&self.test_timestamp),
            url: self.url,
            domain: self.domain,
            browser: self.browser,
            user_agent: self.user_agent,
            page_title: self.page_title,
            status: TestStatus::parse(&self.status).unwrap_or(TestStatus::Error),
            error_message: self.error_message,
            test_duration_ms: self.test_duration_ms,
            scroll_duration_ms: self.scroll_duration_ms,
            timing: crate::models::NavigationTiming {
                dns_lookup_ms: self.dns_lookup_ms,
                tcp_connection_ms: self.tcp_connection_ms,
                tls_negotiation_ms: self.tls_negotiation_ms,
                time_to_first_byte_ms: self.time_to_first_byte_ms,
                response_time_ms: self.response_time_ms,
                dom_content_loaded_ms: self.dom_content_loaded_ms,
                dom_interactive_ms: self.dom_interactive_ms,
                total_page_load_ms: self.total_page_load_ms,
                doc_transfer_size: self.doc_transfer_size,
                doc_encoded_size: self.doc_encoded_size,
                doc_decoded_size: self.doc_decoded_size,
            },
            total_resources: self.total_resources,
            total_transfer_size: self.total_transfer_size,
            total_encoded_size: self.total_encoded_size,
            resources_by_type,
            http_response_codes,
            screenshot_path: self.screenshot_path,
            har_path: self.har_path,
        }
    }
}

/// New URL test for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::url_tests)]
pub struct NewUrlTest<'a> {
    pub uuid: &'a str,
    pub test_run_id: i64,
    pub test_timestamp: &'a str,
    pub url: &'a str,
    pub domain: &'a str,
    pub browser: &'a str,
    pub user_agent: &'a str,
    pub page_title: Option<&'a str>,
    pub status: &'a str,
    pub error_message: Option<&'a str>,
    pub test_duration_ms: i64,
    pub scroll_duration_ms: i64,
    pub dns_lookup_ms: Option<f64>,
    pub tcp_connection_ms: Option<f64>,
    pub tls_negotiation_ms: Option<f64>,
    pub time_to_first_byte_ms: Option<f64>,
    pub response_time_ms: Option<f64>,
    pub dom_content_loaded_ms: Option<f64>,
    pub dom_interactive_ms: Option<f64>,
    pub total_page_load_ms: Option<f64>,
    pub doc_transfer_size: Option<i64>,
    pub doc_encoded_size: Option<i64>,
    pub doc_decoded_size: Option<i64>,
    pub total_resources: i64,
    pub total_transfer_size: i64,
    pub total_encoded_size: i64,
    pub resources_by_type: &'a str,
    pub http_response_codes: &'a str,
    pub screenshot_path: &'a str,
    pub har_path: &'a str,
    pub created_at: &'a str,
}

/// Status histogram row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::status_histogram)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StatusHistogramRecord {
    pub id: i64,
    pub url_test_id: i64,
    pub status_code: i32,
    pub response_count: i64,
}

/// New status histogram row.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::status_histogram)]
pub struct NewStatusHistogramEntry {
    pub url_test_id: i64,
    pub status_code: i32,
    pub response_count: i64,
}

/// Resource type row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::resource_types)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ResourceTypeRecord {
    pub id: i64,
    pub url_test_id: i64,
    pub resource_type: String,
    pub resource_count: i64,
}

/// New resource type row.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::resource_types)]
pub struct NewResourceTypeEntry<'a> {
    pub url_test_id: i64,
    pub resource_type: &'a str,
    pub resource_count: i64,
}
