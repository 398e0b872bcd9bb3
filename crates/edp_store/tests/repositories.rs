use edp_store::{
    CashDirection, CashMovement, ClientProfile, CostHeader, CostLine, DataLayer, ErrorKind, Issue,
    IssueResolution, LogEntry, MemoryCacheStore, PaymentMilestone, Project, SqliteBackend,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn layer() -> DataLayer {
    DataLayer::from_parts(
        Arc::new(SqliteBackend::in_memory().unwrap()),
        Arc::new(MemoryCacheStore::new()),
        Duration::from_secs(60),
    )
}

fn project(layer: &DataLayer, client_id: Option<Uuid>) -> Project {
    let project = Project::new("Metro line 7", client_id);
    layer.projects().insert(&project).unwrap();
    project
}

fn milestone(layer: &DataLayer) -> PaymentMilestone {
    let project = project(layer, None);
    let milestone = PaymentMilestone::new(project.id, 100_000, "CLP");
    layer.milestones().insert(&milestone).unwrap();
    milestone
}

#[test]
fn invalid_entities_never_reach_storage() {
    let layer = layer();
    let project = project(&layer, None);

    let negative = PaymentMilestone::new(project.id, -1, "CLP");
    let err = layer.milestones().insert(&negative).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.id(), Some(negative.id.to_string()));

    let lowercase = PaymentMilestone::new(project.id, 10, "clp");
    assert_eq!(
        layer.milestones().insert(&lowercase).unwrap_err().kind(),
        ErrorKind::Validation
    );

    assert!(layer.milestones().for_project(project.id).unwrap().is_empty());
}

#[test]
fn update_rejects_bad_patches_and_keeps_updated_at_monotonic() {
    let layer = layer();
    let milestone = milestone(&layer);
    let repo = layer.milestones();

    for patch in [
        json!({"id": Uuid::new_v4().to_string()}),
        json!({"colour": "red"}),
        json!({"amount": -5}),
        json!({"amount": "lots"}),
        json!({"currency": "pesos"}),
    ] {
        let patch = patch.as_object().cloned().unwrap();
        let err = repo.update(milestone.id, &patch).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{patch:?}");
    }
    assert_eq!(repo.require(milestone.id).unwrap(), milestone);

    let patch = json!({"amount": 120_000}).as_object().cloned().unwrap();
    let first = repo.update(milestone.id, &patch).unwrap();
    let second = repo.update(milestone.id, &patch).unwrap();
    assert!(first.updated_at >= milestone.updated_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(second.created_at, milestone.created_at);

    let err = repo.update(Uuid::new_v4(), &patch).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn text_identifiers_are_parsed() {
    let layer = layer();
    let milestone = milestone(&layer);
    let text = milestone.id.to_string();

    assert_eq!(layer.milestones().require(text.as_str()).unwrap(), milestone);
    assert_eq!(
        layer.milestones().get("12345").unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[test]
fn clients_and_projects_link_by_reference() {
    let layer = layer();
    let mut acme = ClientProfile::new("Acme Construcciones");
    acme.contact_email = Some("pagos@acme.test".to_string());
    layer.client_profiles().insert(&acme).unwrap();
    let other = ClientProfile::new("Beta Ingeniería");
    layer.client_profiles().insert(&other).unwrap();

    project(&layer, Some(acme.id));
    project(&layer, Some(acme.id));
    project(&layer, Some(other.id));

    assert_eq!(layer.projects().for_client(acme.id).unwrap().len(), 2);
    assert_eq!(layer.projects().for_client(other.id).unwrap().len(), 1);

    let matched = layer.client_profiles().name_like("Acme%").unwrap();
    assert_eq!(matched, vec![acme.clone()]);

    let mut bad = ClientProfile::new("Gamma");
    bad.contact_email = Some("not-an-email".to_string());
    assert_eq!(
        layer.client_profiles().insert(&bad).unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[test]
fn cost_lines_read_in_position_order_and_follow_their_header() {
    let layer = layer();
    let project = project(&layer, None);
    let header = CostHeader::new(project.id, "Structural works");
    layer.cost_headers().insert(&header).unwrap();

    for (position, description) in [(2, "formwork"), (0, "excavation"), (1, "rebar")] {
        let line = CostLine::new(header.id, position, description, 1_000 * (position + 1));
        layer.cost_lines().insert(&line).unwrap();
    }

    let lines = layer.cost_lines().for_header(header.id).unwrap();
    let order: Vec<&str> = lines.iter().map(|line| line.description.as_str()).collect();
    assert_eq!(order, vec!["excavation", "rebar", "formwork"]);
    assert_eq!(layer.cost_headers().for_project(project.id).unwrap(), vec![header.clone()]);

    // Deleting the header removes its lines, including cached copies.
    layer.cost_headers().delete(header.id).unwrap();
    assert!(layer.cost_lines().for_header(header.id).unwrap().is_empty());
    assert_eq!(
        layer.cost_lines().require(lines[0].id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn log_entries_are_append_only_and_queryable() {
    let layer = layer();
    for (actor, step) in [("ana", 1), ("bruno", 2), ("ana", 3), ("ana", 4)] {
        let entry = LogEntry::new(actor, json!({"step": step}));
        layer.log_entries().insert(&entry).unwrap();
    }

    let ana: Vec<i64> = layer
        .log_entries()
        .by_actor("ana")
        .unwrap()
        .iter()
        .map(|entry| entry.payload["step"].as_i64().unwrap())
        .collect();
    assert_eq!(ana, vec![1, 3, 4]);

    let recent = layer.log_entries().recent(2).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].payload["step"], 4);
    assert_eq!(recent[1].payload["step"], 3);

    let patch = json!({"actor": "mallory"}).as_object().cloned().unwrap();
    let err = layer.log_entries().update(recent[0].id, &patch).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        layer.log_entries().delete(recent[0].id).unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[test]
fn cash_movements_filter_by_milestone_and_window() {
    let layer = layer();
    let milestone = milestone(&layer);

    for (timestamp, edp_id) in [(1_000, Some(milestone.id)), (2_000, None), (3_000, Some(milestone.id))] {
        let mut movement = CashMovement::new(50_000, CashDirection::Inflow, edp_id);
        movement.timestamp = timestamp;
        layer.cash_movements().insert(&movement).unwrap();
    }

    let tied: Vec<i64> = layer
        .cash_movements()
        .for_milestone(milestone.id)
        .unwrap()
        .iter()
        .map(|movement| movement.timestamp)
        .collect();
    assert_eq!(tied, vec![1_000, 3_000]);

    let window: Vec<i64> = layer
        .cash_movements()
        .between(1_000, 3_000)
        .unwrap()
        .iter()
        .map(|movement| movement.timestamp)
        .collect();
    assert_eq!(window, vec![1_000, 2_000]);
}

#[test]
fn issues_track_resolution() {
    let layer = layer();
    let milestone = milestone(&layer);
    let first = Issue::open(milestone.id, "Missing signed invoice");
    let second = Issue::open(milestone.id, "Amount differs from contract");
    layer.issues().insert(&first).unwrap();
    layer.issues().insert(&second).unwrap();
    assert_eq!(layer.issues().open_issues().unwrap().len(), 2);

    let patch = json!({"resolution": "resolved"}).as_object().cloned().unwrap();
    let resolved = layer.issues().update(first.id, &patch).unwrap();
    assert_eq!(resolved.resolution, IssueResolution::Resolved);

    assert_eq!(layer.issues().open_issues().unwrap(), vec![second]);
    assert_eq!(layer.issues().for_milestone(milestone.id).unwrap().len(), 2);

    let unknown = json!({"resolution": "ignored"}).as_object().cloned().unwrap();
    assert_eq!(
        layer.issues().update(first.id, &unknown).unwrap_err().kind(),
        ErrorKind::Validation
    );
}
