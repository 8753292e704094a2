//! Instruction Composition
//!
//! Turns a lesson plan and a session mode into the single instruction string
//! the conversational model is constructed with. Section and paragraph
//! boundaries are erased from the model-facing text: the plan is flattened
//! into one space-joined block of teaching content.

use crate::{mode::SessionMode, plan::LessonPlan};

/// Directives shared by every mode.
const CORE_DIRECTIVES: &[&str] = &[
    "Teach only from the study material above and never introduce outside concepts.",
    "For off-topic questions, acknowledge them briefly, then guide the learner back to related ideas in the material instead of saying you don't know.",
    "Never mention sections, paragraphs, figures or any other structure of the material.",
    "Keep every response concise: a few sentences, summarised and high-level.",
    "Present ideas progressively, one concept at a time, building on what came before.",
    "Do not ask the learner for their opinion.",
    "If you need to re-read a passage exactly, use the studyMaterial tool.",
];

const TONE_DIRECTIVES: &[&str] = &[
    "Keep a natural, conversational tone, as if talking with a colleague; do not sound like you are reading from a textbook.",
    "Use short, relevant examples and connect ideas to the learner's everyday experience.",
    "Keep a brisk but comprehensible pace.",
];

/// The mode-dependent parts of the instruction string.
struct ModeTemplate {
    comprehension: &'static str,
    tone: bool,
    interaction: &'static str,
}

fn template(mode: SessionMode) -> ModeTemplate {
    match mode {
        SessionMode::SelfPaced => ModeTemplate {
            comprehension: "When the learner says they understand, take them at their word and continue.",
            tone: false,
            interaction: "The learner may interrupt at any time. Stop, answer, and adjust your explanation to their input before picking the thread back up.",
        },
        SessionMode::ComprehensionCheck => ModeTemplate {
            comprehension: "Do not accept a claim of understanding at face value. Before moving to the next idea, ask the learner to explain the current one in their own words, and only continue once the explanation shows real comprehension. Ask about the content to gauge understanding, never about the learner's opinion, and do not ask whether they are ready to continue.",
            tone: true,
            interaction: "You lead the session. Ask specific, engaging questions about the content periodically.",
        },
        SessionMode::HandRaise => ModeTemplate {
            comprehension: "When the learner says they understand, take them at their word and continue.",
            tone: true,
            interaction: "Teach without pausing for questions. When told the learner has raised their hand, finish your sentence, invite their question and answer it before continuing. Encourage questions at natural pauses.",
        },
    }
}

/// Joins every paragraph of the plan into one space-separated block.
pub fn flatten(plan: &LessonPlan) -> String {
    plan.paragraphs().collect::<Vec<_>>().join(" ")
}

/// Composes instruction and welcome text for a subject.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    subject: String,
}

impl PromptComposer {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Builds the instruction string for the conversational model.
    ///
    /// Pure and deterministic: the same plan and mode always produce the same
    /// text. An empty plan still yields the full template.
    pub fn compose(&self, plan: &LessonPlan, mode: SessionMode) -> String {
        let template = template(mode);
        let mut out = format!(
            "You are a digital tutor teaching {} in a live voice conversation with a single learner.\n\n",
            self.subject
        );

        out.push_str("# Study material\n");
        out.push_str("Teach the following material progressively, in the order it is given:\n\"\"\"\n");
        out.push_str(&flatten(plan));
        out.push_str("\n\"\"\"\n\n");

        out.push_str("# Core directives\n");
        push_bullets(&mut out, CORE_DIRECTIVES);

        out.push_str("\n# Checking understanding\n");
        out.push_str(template.comprehension);
        out.push('\n');

        if template.tone {
            out.push_str("\n# Tone\n");
            push_bullets(&mut out, TONE_DIRECTIVES);
        }

        out.push_str("\n# Interaction\n");
        out.push_str(template.interaction);
        out.push('\n');
        out
    }

    /// The scripted first utterance of a session.
    pub fn welcome_message(&self, plan: &LessonPlan, mode: SessionMode) -> String {
        let count = plan.section_count();
        let noun = if count == 1 { "section" } else { "sections" };
        format!(
            "Welcome to your {} tutorial session! We'll be covering {} {} today. {} Let's begin.",
            self.subject,
            count,
            noun,
            mode.greeting()
        )
    }
}

fn push_bullets(out: &mut String, lines: &[&str]) {
    for line in lines {
        out.push_str("- ");
        out.push_str(line);
        out.push('\n');
    }
}
