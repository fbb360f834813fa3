//! Build a script from recorded event steps

use cmdflow_log::{EventError, EventIndex, LogId};
use cmdflow_script::{AssembledScript, ScriptType, Section, SectionSource};

/// Concatenate the code of `ids` into one script.
///
/// The script type comes from the first step's parent event; when that
/// event is gone or names an unknown type, `fallback` is used. Steps
/// recorded without code keep their section with a placeholder comment.
pub fn build_from_steps(
    index: &EventIndex,
    ids: &[LogId],
    fallback: ScriptType,
) -> Result<AssembledScript, EventError> {
    let steps = ids
        .iter()
        .map(|&id| index.step(id))
        .collect::<Result<Vec<_>, _>>()?;

    let script_type = steps
        .first()
        .and_then(|step| step.parent_id())
        .and_then(|parent| index.get(parent))
        .and_then(|start| start.as_event_start())
        .and_then(|start| start.script_type.parse().ok())
        .unwrap_or_else(|| {
            tracing::debug!(%fallback, "script type not recoverable from parent event");
            fallback
        });

    let sections = steps
        .iter()
        .filter_map(|record| record.as_event_step().map(|step| (record.id, step)))
        .map(|(id, step)| Section {
            node_id: id.to_string(),
            label: step.name.clone(),
            code: step
                .code
                .clone()
                .unwrap_or_else(|| script_type.comment(&format!("step #{id} recorded no code"))),
            source: SectionSource::Replay(id),
        })
        .collect();

    let title = ids
        .iter()
        .map(|id| format!("#{id}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(AssembledScript {
        script_type,
        title: format!("steps {title}"),
        sections,
    })
}
