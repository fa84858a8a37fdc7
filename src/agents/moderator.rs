use async_trait::async_trait;
use std::sync::Arc;

use super::{Agent, AgentContext, CostPhase};
use crate::broker::{BrokerRequest, BrokerResponse, LLMBroker, ModelTier};
use crate::domain::{ContributionMessage, ModeratorType, Phase};
use crate::error::EngineError;

fn persona(moderator_type: ModeratorType) -> &'static str {
    match moderator_type {
        ModeratorType::Contrarian => "moderator:contrarian",
        ModeratorType::Skeptic => "moderator:skeptic",
        ModeratorType::Optimist => "moderator:optimist",
    }
}

fn system_prompt(moderator_type: ModeratorType) -> &'static str {
    match moderator_type {
        ModeratorType::Contrarian => {
            "You are a contrarian moderator injected into an expert discussion. Argue the \
             opposite of the panel's current leaning in a single sharp intervention, so the \
             panel is forced to defend its position rather than drift toward easy consensus."
        }
        ModeratorType::Skeptic => {
            "You are a skeptical moderator injected into an expert discussion. Demand evidence \
             for the panel's strongest claim so far, in a single intervention, without taking a \
             side of your own."
        }
        ModeratorType::Optimist => {
            "You are an optimist moderator injected into an expert discussion. Point out the \
             upside the panel has been ignoring, in a single intervention, without dismissing \
             the risks already raised."
        }
    }
}

/// Emits a single intervention contribution, attributed to a synthetic
/// `moderator:<type>` persona code rather than a panel member.
pub struct ModeratorAgent {
    broker: Arc<dyn LLMBroker>,
}

impl ModeratorAgent {
    pub fn new(broker: Arc<dyn LLMBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Agent for ModeratorAgent {
    type Input = (ModeratorType, String, u8);
    type Output = ContributionMessage;

    async fn run(&self, input: Self::Input, _ctx: &AgentContext) -> Result<(Self::Output, BrokerResponse), EngineError> {
        let (moderator_type, assembled_context, round_number) = input;
        let request = BrokerRequest::new(assembled_context, ModelTier::Balanced).with_system(system_prompt(moderator_type));
        let response = self.broker.call(request).await?;
        let contribution = ContributionMessage::new(persona(moderator_type), round_number, response.text.clone(), Phase::Challenge);
        Ok((contribution, response))
    }

    fn phase(&self) -> CostPhase {
        CostPhase::Discussion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;

    #[tokio::test]
    async fn intervention_is_attributed_to_moderator_persona() {
        let broker = Arc::new(MockBroker::new());
        broker.push_response("But have we considered the downside risk here?").await;
        let agent = ModeratorAgent::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 3);
        let (contribution, _) = agent.run((ModeratorType::Skeptic, "context".into(), 3), &ctx).await.unwrap();
        assert_eq!(contribution.persona_code, "moderator:skeptic");
        assert_eq!(contribution.phase, Phase::Challenge);
    }
}
