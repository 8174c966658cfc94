//! Ingress operations: admission, listing, deletion, auth, models.

mod support;

use bytes::Bytes;
use vision_core::{
    ActionType, Credentials, ImageRef, Request, RequestStatus, Specialization,
};
use visiongrid_scheduler::{
    AdmissionError, NO_IMAGE_RESOLVED, Persistence, SchedulerError,
};

use support::{Knobs, harness, jpeg};

const OWNER: &str = "ana@example.com";

#[tokio::test]
async fn malformed_requests_never_enter_the_queue() {
    let h = harness(Knobs::default());
    let cases = [
        ("", "yolov8n", "detect", vec![ImageRef::local("i", jpeg("a"))]),
        (OWNER, "", "detect", vec![ImageRef::local("i", jpeg("a"))]),
        (OWNER, "yolov8n", "explode", vec![ImageRef::local("i", jpeg("a"))]),
        (OWNER, "yolov8n", "detect", vec![]),
        (OWNER, "yolov8n", "detect", vec![ImageRef::local("i", Bytes::new())]),
        (
            OWNER,
            "yolov8n",
            "detect",
            vec![ImageRef::local("i", jpeg("a")), ImageRef::local("i", jpeg("b"))],
        ),
    ];
    for (owner, model, action, images) in cases {
        let err = h
            .scheduler
            .submit(owner, model, action, images)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Admission(_)), "{err}");
    }
    assert_eq!(h.scheduler.queue().depth().await, 0);
    assert!(h.persistence.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_image_ids_are_rejected() {
    let h = harness(Knobs::default());
    let err = h
        .scheduler
        .submit(
            OWNER,
            "yolov8n",
            "detect",
            vec![
                ImageRef::local("cat.png", jpeg("cat")),
                ImageRef::local("cat.png", jpeg("dog")),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Admission(AdmissionError::DuplicateImageId(ref id)) if id == "cat.png"
    ));
    assert!(h.images.stored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_action_is_reported() {
    let h = harness(Knobs::default());
    let err = h
        .scheduler
        .submit(OWNER, "yolov8n", "segment", vec![ImageRef::local("i", jpeg("a"))])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Admission(AdmissionError::UnknownAction(_))
    ));
}

#[tokio::test]
async fn remote_images_are_fetched_and_stored() {
    let h = harness(Knobs::default());
    h.fetcher
        .images
        .lock()
        .unwrap()
        .insert("http://img.local/cat.jpg".into(), jpeg("cat"));

    let id = h
        .scheduler
        .submit(
            OWNER,
            "yolov8n",
            "detect",
            vec![
                ImageRef::remote("cat", "http://img.local/cat.jpg"),
                ImageRef::remote("gone", "http://img.local/gone.jpg"),
            ],
        )
        .await
        .unwrap();

    let item_payloads = h.images.stored.lock().unwrap().len();
    assert_eq!(item_payloads, 1);
    assert_eq!(
        h.scheduler.query_status(&id).await.unwrap().status,
        RequestStatus::Queued
    );

    h.scheduler.dispatch_next().await;
    let report = h.scheduler.query_status(&id).await.unwrap();
    assert_eq!(report.status, RequestStatus::Completed);
    assert_eq!(report.result.map(|r| r.len()), Some(1));
}

#[tokio::test]
async fn unresolvable_images_fail_at_admission() {
    let h = harness(Knobs::default());
    let id = h
        .scheduler
        .submit(
            OWNER,
            "yolov8n",
            "detect",
            vec![ImageRef::remote("gone", "http://img.local/gone.jpg")],
        )
        .await
        .unwrap();
    let report = h.scheduler.query_status(&id).await.unwrap();
    assert_eq!(report.status, RequestStatus::Failed);
    assert_eq!(report.failure_reason.as_deref(), Some(NO_IMAGE_RESOLVED));
    assert_eq!(h.scheduler.queue().depth().await, 0);
}

#[tokio::test]
async fn classifier_results_are_described() {
    let h = harness(Knobs::default());
    let id = h
        .scheduler
        .submit(OWNER, "melanoma_custom", "classify", vec![ImageRef::local("i", jpeg("a"))])
        .await
        .unwrap();
    h.scheduler.dispatch_next().await;
    let result = h.scheduler.query_status(&id).await.unwrap().result.unwrap();
    assert_eq!(result, vec!["The model predicts benign with 75.00% confidence."]);
    assert_eq!(
        h.fleet.launches.lock().unwrap()[0].action_type,
        ActionType::Classify
    );
}

#[tokio::test]
async fn list_requests_newest_first_per_owner() {
    let h = harness(Knobs::default());
    let a = h
        .scheduler
        .submit(OWNER, "yolov8n", "detect", vec![ImageRef::local("i", jpeg("a"))])
        .await
        .unwrap();
    h.scheduler
        .submit("bob@example.com", "yolov8n", "detect", vec![ImageRef::local("i", jpeg("b"))])
        .await
        .unwrap();

    let mine = h.scheduler.list_requests(OWNER).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].request_id, a);
    assert_eq!(mine[0].status, RequestStatus::Queued);
}

#[tokio::test]
async fn delete_checks_ownership_and_removes_images() {
    let h = harness(Knobs::default());
    let id = h
        .scheduler
        .submit(OWNER, "yolov8n", "detect", vec![ImageRef::local("i", jpeg("a"))])
        .await
        .unwrap();
    h.scheduler.dispatch_next().await;

    assert!(!h.scheduler.delete_request(&id, "mallory@example.com").await.unwrap());
    assert!(h.scheduler.query_status(&id).await.is_ok());

    // Owner e-mails are trimmed on delete just as on submit.
    assert!(h.scheduler.delete_request(&id, &format!("  {OWNER} ")).await.unwrap());
    assert!(matches!(
        h.scheduler.query_status(&id).await,
        Err(SchedulerError::NotFound(_))
    ));
    assert!(h.images.stored.lock().unwrap().is_empty());
    assert!(!h.scheduler.delete_request(&id, OWNER).await.unwrap());
}

#[tokio::test]
async fn deleted_while_queued_is_skipped() {
    let h = harness(Knobs::default());
    let id = h
        .scheduler
        .submit(OWNER, "yolov8n", "detect", vec![ImageRef::local("i", jpeg("a"))])
        .await
        .unwrap();
    assert!(h.scheduler.delete_request(&id, OWNER).await.unwrap());

    assert_eq!(h.scheduler.dispatch_next().await.as_deref(), Some(id.as_str()));
    assert!(h.fleet.calls.lock().unwrap().is_empty());
    assert!(h.persistence.requests.lock().unwrap().is_empty());
    assert_eq!(h.scheduler.queue().outstanding().await, 0);
}

#[tokio::test]
async fn query_falls_back_to_persistence() {
    let h = harness(Knobs::default());
    let mut old = Request::pending(
        "from-last-run".into(),
        OWNER,
        Specialization::new("yolov8n", ActionType::Detect),
        vec!["i".into()],
    );
    old.status = RequestStatus::Completed;
    h.persistence.save_request(&old).await.unwrap();
    h.persistence
        .save_result("from-last-run", OWNER, &["cat detected".to_string()])
        .await
        .unwrap();

    let report = h.scheduler.query_status("from-last-run").await.unwrap();
    assert_eq!(report.status, RequestStatus::Completed);
    assert_eq!(report.result, Some(vec!["cat detected".to_string()]));
    assert_eq!(h.scheduler.list_requests(OWNER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn authentication_and_models() {
    let h = harness(Knobs::default());
    let good = Credentials {
        username: "ana".into(),
        email: OWNER.into(),
        password: "secret".into(),
    };
    h.scheduler.authenticate(&good).await.unwrap();
    let bad = Credentials {
        password: "guess".into(),
        ..good
    };
    assert!(matches!(
        h.scheduler.authenticate(&bad).await,
        Err(SchedulerError::Unauthorized)
    ));

    let names: Vec<String> = h
        .scheduler
        .list_models()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert!(names.contains(&"yolov8".to_string()));
    assert_eq!(h.scheduler.model_details("YOLOv5").unwrap().file, "yolov5s.pt");
    assert!(matches!(
        h.scheduler.model_details("nope"),
        Err(SchedulerError::Model(_))
    ));
}
