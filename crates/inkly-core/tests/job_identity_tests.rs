//! Integration tests for resolving job identity after an upload.

use inkly_core::{Job, JobIdOrigin, JobState, UploadResult, derive_job_id};

#[test]
fn job_identity_tests_uses_filename_prefix_when_server_omits_id() {
    let upload = UploadResult {
        filename: "abc_1.png".to_string(),
        job_id: None,
    };
    let derived = derive_job_id(&upload.filename, upload.job_id.as_deref(), || 0);
    assert_eq!(derived.id, "abc");
    assert_eq!(derived.origin, JobIdOrigin::Filename);

    let mut job = Job::new("sample.png").expect("job should build");
    job.begin_upload().expect("upload should start");
    job.assign_upload(upload.filename, derived.id)
        .expect("upload should assign");

    assert_eq!(job.id(), Some("abc"));
    assert_eq!(job.source_filename(), "abc_1.png");
    assert_eq!(job.state(), JobState::Uploading);
}

#[test]
fn job_identity_tests_blank_upload_filename_keeps_original() {
    let mut job = Job::new("sample.png").expect("job should build");
    job.begin_upload().expect("upload should start");
    job.assign_upload("  ", "abc").expect("upload should assign");
    assert_eq!(job.source_filename(), "sample.png");
}

#[test]
fn job_identity_tests_assignment_requires_uploading_state() {
    let mut job = Job::new("sample.png").expect("job should build");
    assert!(job.assign_upload("abc_1.png", "abc").is_err());
    assert_eq!(job.id(), None);
}

#[test]
fn job_identity_tests_clock_fallback_is_last_resort() {
    let derived = derive_job_id("_", None, || 42);
    assert_eq!(derived.id, "42");
    assert_eq!(derived.origin, JobIdOrigin::Clock);
}
