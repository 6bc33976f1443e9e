//! Lesson context snapshots fed to the voice assistant.
//!
//! The manager reads a snapshot when a session opens (to build the instruction message) and
//! re-reads it while active to push plan updates.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Lesson form fields plus the currently generated plan, if any.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct LessonContext {
    pub unit_name: String,
    pub topic: String,
    pub grade_level: String,
    pub subject: String,
    pub standards: String,
    pub context: String,
    pub plan_text: Option<String>,
}

impl LessonContext {
    /// Plan text, treating blank text as absent.
    pub fn plan(&self) -> Option<&str> {
        self.plan_text
            .as_deref()
            .filter(|plan| !plan.trim().is_empty())
    }
}

/// Synchronous read of the current lesson context.
pub trait ContextSnapshotSource: Send + Sync {
    fn snapshot(&self) -> LessonContext;
}

/// In-memory context shared with whatever edits the lesson.
#[derive(Clone, Default)]
pub struct SharedContext {
    inner: Arc<Mutex<LessonContext>>,
}

impl SharedContext {
    pub fn new(initial: LessonContext) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut LessonContext)) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }

    pub fn set_plan(&self, plan: impl Into<String>) {
        let plan = plan.into();
        self.update(|ctx| ctx.plan_text = Some(plan));
    }
}

impl ContextSnapshotSource for SharedContext {
    fn snapshot(&self) -> LessonContext {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Context read from a JSON file written by the lesson editor.
///
/// A missing or half-written file yields the last snapshot that parsed.
pub struct FileContextSource {
    path: PathBuf,
    last_good: Mutex<LessonContext>,
}

impl FileContextSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_good: Mutex::new(LessonContext::default()),
        }
    }

    fn read(&self) -> anyhow::Result<LessonContext> {
        let text = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl ContextSnapshotSource for FileContextSource {
    fn snapshot(&self) -> LessonContext {
        let mut last_good = match self.last_good.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match self.read() {
            Ok(ctx) => {
                *last_good = ctx.clone();
                ctx
            }
            Err(e) => {
                log::warn!(
                    "Failed to read lesson context {}: {}",
                    self.path.display(),
                    e
                );
                last_good.clone()
            }
        }
    }
}

fn push_field(out: &mut String, label: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        out.push_str(&format!("- {}: (not provided)\n", label));
    } else {
        out.push_str(&format!("- {}: {}\n", label, value));
    }
}

/// Instruction sent as the first text event of a session.
pub fn build_instruction(ctx: &LessonContext) -> String {
    let mut out = String::from(
        "You are a friendly, knowledgeable lesson-planning assistant talking with a teacher. \
         Keep spoken answers short and practical, suggest concrete classroom activities, \
         and ask a clarifying question when a request is ambiguous.\n\n\
         Current lesson details:\n",
    );
    push_field(&mut out, "Unit", &ctx.unit_name);
    push_field(&mut out, "Topic", &ctx.topic);
    push_field(&mut out, "Grade level", &ctx.grade_level);
    push_field(&mut out, "Subject", &ctx.subject);
    push_field(&mut out, "Standards", &ctx.standards);
    push_field(&mut out, "Additional context", &ctx.context);

    match ctx.plan() {
        Some(plan) => {
            out.push_str("\nThe teacher's current lesson plan (Markdown):\n");
            out.push_str(plan);
            out.push('\n');
        }
        None => out.push_str("\nNo lesson plan has been generated yet.\n"),
    }
    out
}

/// Follow-up text event sent when the plan changes during a session.
pub fn plan_update_message(plan: &str) -> String {
    format!(
        "The lesson plan was just updated. Use this new version from now on:\n{}",
        plan
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LessonContext {
        LessonContext {
            unit_name: "Ecosystems".into(),
            topic: "Food webs".into(),
            grade_level: "5".into(),
            subject: "Science".into(),
            standards: String::new(),
            context: "Mixed-ability class".into(),
            plan_text: None,
        }
    }

    #[test]
    fn test_instruction_lists_fields_and_missing_plan() {
        let text = build_instruction(&sample());
        assert!(text.contains("- Unit: Ecosystems"));
        assert!(text.contains("- Grade level: 5"));
        assert!(text.contains("- Standards: (not provided)"));
        assert!(text.contains("No lesson plan has been generated yet."));
    }

    #[test]
    fn test_instruction_includes_plan() {
        let mut ctx = sample();
        ctx.plan_text = Some("# Day 1\nWarm-up".into());
        let text = build_instruction(&ctx);
        assert!(text.contains("# Day 1\nWarm-up"));
        assert!(!text.contains("No lesson plan"));
    }

    #[test]
    fn test_blank_plan_counts_as_absent() {
        let mut ctx = sample();
        ctx.plan_text = Some("   \n".into());
        assert_eq!(ctx.plan(), None);
    }

    #[test]
    fn test_context_json_uses_camel_case() {
        let ctx: LessonContext = serde_json::from_str(
            r#"{"unitName":"Fractions","gradeLevel":"4","planText":"Plan A"}"#,
        )
        .unwrap();
        assert_eq!(ctx.unit_name, "Fractions");
        assert_eq!(ctx.grade_level, "4");
        assert_eq!(ctx.plan(), Some("Plan A"));
        assert_eq!(ctx.subject, "");
    }

    #[test]
    fn test_file_source_keeps_last_good_snapshot() {
        let path = std::env::temp_dir().join(format!(
            "lesson_context_{}.json",
            uuid::Uuid::new_v4()
        ));
        std::fs::write(&path, r#"{"topic":"Volcanoes","planText":"v1"}"#).unwrap();

        let source = FileContextSource::new(path.clone());
        assert_eq!(source.snapshot().topic, "Volcanoes");

        std::fs::write(&path, "{ half written").unwrap();
        let snap = source.snapshot();
        assert_eq!(snap.topic, "Volcanoes");
        assert_eq!(snap.plan(), Some("v1"));

        std::fs::remove_file(&path).unwrap();
        assert_eq!(source.snapshot().topic, "Volcanoes");
    }

    #[test]
    fn test_shared_context_updates_are_visible() {
        let shared = SharedContext::new(sample());
        shared.set_plan("New plan");
        assert_eq!(shared.snapshot().plan(), Some("New plan"));
    }
}
