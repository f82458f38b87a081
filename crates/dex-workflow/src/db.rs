use crate::types::{Event, EventId, Workflow, WorkflowId};
use dex_host::{HostError, Transaction, TransactionExt};
use dex_types::JournalEntry;

const WORKFLOWS: &str = "dex_workflow:workflows";
const JOURNALS: &str = "dex_workflow:journals";
const EVENTS: &str = "dex_workflow:events";

pub fn get_workflow(tx: &dyn Transaction, id: WorkflowId) -> Result<Option<Workflow>, HostError> {
    tx.get(WORKFLOWS, &id.to_string())
}

pub fn put_workflow(tx: &mut dyn Transaction, wf: &Workflow) -> Result<(), HostError> {
    tx.put(WORKFLOWS, &wf.id.to_string(), wf)
}

pub fn delete_workflow(tx: &mut dyn Transaction, id: WorkflowId) {
    tx.delete(WORKFLOWS, &id.to_string());
    tx.delete(JOURNALS, &id.to_string());
}

pub fn list_workflows(tx: &dyn Transaction) -> Result<Vec<Workflow>, HostError> {
    let all: Vec<(String, Workflow)> = tx.scan(WORKFLOWS)?;
    Ok(all.into_iter().map(|(_, w)| w).collect())
}

/// Still-running workflows spawned by `parent_id` (used to cascade-cancel
/// a workflow tree).
pub fn running_children_of(tx: &dyn Transaction, parent_id: WorkflowId) -> Result<Vec<Workflow>, HostError> {
    Ok(list_workflows(tx)?
        .into_iter()
        .filter(|w| w.run_result.is_none() && w.parent.as_ref().is_some_and(|p| p.workflow_id == parent_id))
        .collect())
}

pub fn get_journal(tx: &dyn Transaction, id: WorkflowId) -> Result<Vec<JournalEntry>, HostError> {
    Ok(tx.get::<Vec<JournalEntry>>(JOURNALS, &id.to_string())?.unwrap_or_default())
}

pub fn put_journal(
    tx: &mut dyn Transaction,
    id: WorkflowId,
    entries: &[JournalEntry],
) -> Result<(), HostError> {
    tx.put(JOURNALS, &id.to_string(), &entries.to_vec())
}

pub fn get_event(tx: &dyn Transaction, id: EventId) -> Result<Option<Event>, HostError> {
    tx.get(EVENTS, &id.0.to_string())
}

pub fn put_event(tx: &mut dyn Transaction, event: &Event) -> Result<(), HostError> {
    tx.put(EVENTS, &event.id.0.to_string(), event)
}

/// Events created for `workflow_id`, optionally narrowed by `name`.
pub fn find_events(
    tx: &dyn Transaction,
    workflow_id: WorkflowId,
    name: Option<&str>,
) -> Result<Vec<Event>, HostError> {
    let all: Vec<(String, Event)> = tx.scan(EVENTS)?;
    Ok(all
        .into_iter()
        .map(|(_, e)| e)
        .filter(|e| e.workflow_id == workflow_id)
        .filter(|e| name.is_none_or(|n| e.name.as_deref() == Some(n)))
        .collect())
}

pub fn find_event_by_id(
    tx: &dyn Transaction,
    workflow_id: WorkflowId,
    id: EventId,
) -> Result<Option<Event>, HostError> {
    Ok(get_event(tx, id)?.filter(|e| e.workflow_id == workflow_id))
}
