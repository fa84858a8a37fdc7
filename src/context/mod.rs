//! Context composer
//!
//! Assembles a persona's prompt from five layered, ordered fragments so
//! context grows linearly in sub-problem count rather than quadratically:
//! dependency context, prior sub-problem outcomes, the expert's own
//! memory, hierarchical round context (summarized older rounds, full
//! current round), and the current round's instructions.

use crate::domain::{ContributionMessage, Phase, SessionState, SubProblem};

pub struct ContextComposer;

impl ContextComposer {
    pub fn compose(
        state: &SessionState,
        current: &SubProblem,
        persona_code: &str,
        phase: Phase,
        speaker_prompt: &str,
    ) -> String {
        let mut fragments = Vec::new();
        if let Some(f) = Self::dependency_context(state, current) {
            fragments.push(f);
        }
        if let Some(f) = Self::prior_outcomes(state) {
            fragments.push(f);
        }
        if let Some(f) = Self::expert_memory(state, persona_code) {
            fragments.push(f);
        }
        fragments.push(Self::round_context(state));
        fragments.push(Self::round_instructions(current, phase, speaker_prompt));
        fragments.join("\n\n")
    }

    fn dependency_context(state: &SessionState, current: &SubProblem) -> Option<String> {
        if current.dependencies.is_empty() {
            return None;
        }
        let mut lines = vec!["## Dependency context".to_string()];
        for dep_id in &current.dependencies {
            if let Some(result) = state.sub_problem_results.iter().find(|r| &r.sub_problem_id == dep_id) {
                lines.push(format!("- {} ({}): {}", dep_id, result.goal, result.synthesis));
            }
        }
        if lines.len() == 1 {
            return None;
        }
        Some(lines.join("\n"))
    }

    /// All completed sub-problems, including those the current persona did
    /// not participate in — so experts joining late still see the whole
    /// decision trail.
    fn prior_outcomes(state: &SessionState) -> Option<String> {
        if state.sub_problem_results.is_empty() {
            return None;
        }
        let mut lines = vec!["## Prior sub-problem outcomes".to_string()];
        for result in &state.sub_problem_results {
            lines.push(format!(
                "- {} ({}): panel [{}] concluded: {}",
                result.sub_problem_id,
                result.goal,
                result.expert_panel.join(", "),
                result.synthesis
            ));
        }
        Some(lines.join("\n"))
    }

    fn expert_memory(state: &SessionState, persona_code: &str) -> Option<String> {
        state
            .expert_memory
            .get(persona_code)
            .map(|summary| format!("## Your prior positions\n{summary}"))
    }

    /// Compact summaries for older rounds in the current sub-problem, full
    /// transcripts for the current round.
    fn round_context(state: &SessionState) -> String {
        let mut lines = vec!["## Discussion so far".to_string()];
        for (i, summary) in state.round_summaries.iter().enumerate() {
            lines.push(format!("Round {} (summary): {summary}", i + 1));
        }
        let current_round: Vec<&ContributionMessage> = state
            .contributions
            .iter()
            .filter(|c| c.round_number == state.round_number)
            .collect();
        if !current_round.is_empty() {
            lines.push(format!("Round {} (full):", state.round_number));
            for c in current_round {
                lines.push(format!("{}: {}", c.persona_code, c.content));
            }
        }
        lines.join("\n")
    }

    fn round_instructions(current: &SubProblem, phase: Phase, speaker_prompt: &str) -> String {
        let phase_label = match phase {
            Phase::Exploration => "exploration",
            Phase::Challenge => "challenge",
            Phase::Convergence => "convergence",
        };
        let remaining_questions = current
            .focus
            .as_ref()
            .map(|f| f.key_questions.join("; "))
            .unwrap_or_default();
        format!(
            "## This round\nPhase: {phase_label}\nRemaining key questions: {remaining_questions}\n{speaker_prompt}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Problem, Recommendation, SubProblemResult};

    #[test]
    fn omits_dependency_fragment_when_no_dependencies() {
        let state = SessionState::new("s1", Problem::new("p1", "x"), 4);
        let sub = SubProblem::new("sp0", "goal", "rationale");
        let out = ContextComposer::compose(&state, &sub, "cfo_advisor", Phase::Exploration, "speak now");
        assert!(!out.contains("Dependency context"));
    }

    #[test]
    fn includes_dependency_and_prior_outcomes() {
        let mut state = SessionState::new("s1", Problem::new("p1", "x"), 4);
        let mut result = SubProblemResult::success("sp0", "pricing", "raise prices by 10%");
        result.recommendations.push(Recommendation::new("cfo_advisor", "raise prices", 0.8));
        result.expert_panel = vec!["cfo_advisor".to_string()];
        state.sub_problem_results.push(result);

        let mut sub = SubProblem::new("sp1", "staffing", "rationale");
        sub.dependencies = vec!["sp0".to_string()];

        let out = ContextComposer::compose(&state, &sub, "coo_advisor", Phase::Exploration, "speak now");
        assert!(out.contains("Dependency context"));
        assert!(out.contains("raise prices by 10%"));
        assert!(out.contains("Prior sub-problem outcomes"));
    }

    #[test]
    fn includes_expert_memory_when_present() {
        let mut state = SessionState::new("s1", Problem::new("p1", "x"), 4);
        state.expert_memory.insert("cfo_advisor".to_string(), "previously argued for cost discipline".to_string());
        let sub = SubProblem::new("sp0", "goal", "rationale");
        let out = ContextComposer::compose(&state, &sub, "cfo_advisor", Phase::Exploration, "speak now");
        assert!(out.contains("cost discipline"));
    }
}
