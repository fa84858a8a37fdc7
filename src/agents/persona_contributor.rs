use async_trait::async_trait;
use std::sync::Arc;

use super::{Agent, AgentContext, CostPhase};
use crate::broker::{BrokerRequest, BrokerResponse, LLMBroker};
use crate::domain::{ContributionMessage, Phase, PersonaProfile};
use crate::error::EngineError;

/// A single expert turn. Length target is carried in the prompt, not
/// enforced in code — an LLM instructed to write 150-250 words rarely
/// needs a hard truncation pass, and truncating mid-argument would
/// produce a worse contribution than a slightly long one.
pub struct PersonaContributor {
    broker: Arc<dyn LLMBroker>,
}

impl PersonaContributor {
    pub fn new(broker: Arc<dyn LLMBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Agent for PersonaContributor {
    type Input = (PersonaProfile, String, Phase, u8);
    type Output = ContributionMessage;

    async fn run(&self, input: Self::Input, ctx: &AgentContext) -> Result<(Self::Output, BrokerResponse), EngineError> {
        let (profile, assembled_context, phase, round_number) = input;
        let system_prompt = format!(
            "{}\n\nWrite a 150-250 word contribution to the panel discussion below, in character \
             as {}. Be concrete and take a position; do not just summarize what others said.",
            profile.system_prompt, profile.display_name
        );
        let request = BrokerRequest::new(assembled_context, ctx.discussion_tier()).with_system(system_prompt);
        let response = self.broker.call(request).await?;
        let contribution = ContributionMessage::new(profile.code.clone(), round_number, response.text.clone(), phase);
        Ok((contribution, response))
    }

    fn phase(&self) -> CostPhase {
        CostPhase::Discussion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{ModelTier, MockBroker};

    #[tokio::test]
    async fn contribution_is_attributed_to_the_persona_code() {
        let broker = Arc::new(MockBroker::new());
        broker.push_response("I think we should proceed cautiously.").await;
        let agent = PersonaContributor::new(broker);
        let profile = PersonaProfile {
            code: "cfo_advisor".into(),
            display_name: "CFO Advisor".into(),
            domain_expertise: vec!["finance".into()],
            system_prompt: "You are a CFO.".into(),
            archetype: Some("finance".into()),
        };
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 1);
        let (contribution, _) = agent.run((profile, "context".into(), Phase::Exploration, 1), &ctx).await.unwrap();
        assert_eq!(contribution.persona_code, "cfo_advisor");
        assert_eq!(contribution.round_number, 1);
    }

    #[tokio::test]
    async fn early_rounds_use_fast_tier() {
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 1);
        assert_eq!(ctx.discussion_tier(), ModelTier::Fast);
        let ctx_late = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 3);
        assert_eq!(ctx_late.discussion_tier(), ModelTier::Balanced);
    }
}
