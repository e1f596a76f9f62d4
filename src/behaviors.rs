//! Persona behaviors
//!
//! The orchestrator only knows these two collaborator interfaces. Real
//! platform clients implement them outside this crate; the dry-run versions
//! here compose output from the persona and log it instead of posting.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::agent::Metric;
use crate::character::{Character, PhraseCategory, SharedCharacter, StyleContext};

/// Checks mentions and replies in character
#[async_trait]
pub trait InteractionBehavior: Send + Sync {
    /// Returns the number of replies sent
    async fn monitor_and_respond(&self) -> Result<Metric>;
}

/// Writes and publishes original posts
#[async_trait]
pub trait ContentBehavior: Send + Sync {
    /// Returns the number of posts published
    async fn generate_and_post(&self) -> Result<Metric>;
}

/// Compose a post from the persona's topics, phrases and examples
pub fn compose_post(character: &Character, rng: &mut impl Rng) -> Result<String> {
    if let Some(example) = character.post_examples.choose(rng) {
        if rng.gen_bool(0.5) {
            return Ok(example.clone());
        }
    }

    let topic = character
        .topics
        .choose(rng)
        .with_context(|| format!("Persona {} has no topics to post about", character.handle))?;

    let category = PhraseCategory::ALL
        .iter()
        .copied()
        .filter(|c| !character.phrases(*c).is_empty())
        .collect::<Vec<_>>()
        .choose(rng)
        .copied();

    Ok(match category.and_then(|c| character.phrases(c).choose(rng)) {
        Some(phrase) => format!("{} #{}", phrase, topic.replace(' ', "")),
        None => format!("On {}.", topic),
    })
}

/// Pick an in-character reply for an incoming message
pub fn compose_reply(character: &Character, rng: &mut impl Rng) -> Option<String> {
    character
        .message_examples
        .choose(rng)
        .map(|exchange| exchange.response.text.clone())
}

/// Logs the replies it would send
pub struct DryRunInteraction {
    persona: SharedCharacter,
    rng: Mutex<StdRng>,
    max_replies: u64,
}

impl DryRunInteraction {
    pub fn new(persona: SharedCharacter) -> Self {
        Self::with_rng(persona, StdRng::from_entropy())
    }

    pub fn with_seed(persona: SharedCharacter, seed: u64) -> Self {
        Self::with_rng(persona, StdRng::seed_from_u64(seed))
    }

    fn with_rng(persona: SharedCharacter, rng: StdRng) -> Self {
        Self {
            persona,
            rng: Mutex::new(rng),
            max_replies: 3,
        }
    }
}

#[async_trait]
impl InteractionBehavior for DryRunInteraction {
    async fn monitor_and_respond(&self) -> Result<Metric> {
        let character = self.persona.current();
        let style = character.style_rules(StyleContext::Chat).join(", ");

        let replies = {
            let mut rng = self.rng.lock();
            let pending = rng.gen_range(0..=self.max_replies);
            (0..pending)
                .filter_map(|_| compose_reply(&character, &mut *rng))
                .collect::<Vec<_>>()
        };

        for reply in &replies {
            info!("[dry-run] {} would reply ({}): {}", character.handle, style, reply);
        }
        Ok(Metric::replies(replies.len() as u64))
    }
}

/// Logs the posts it would publish
pub struct DryRunContent {
    persona: SharedCharacter,
    rng: Mutex<StdRng>,
}

impl DryRunContent {
    pub fn new(persona: SharedCharacter) -> Self {
        Self {
            persona,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(persona: SharedCharacter, seed: u64) -> Self {
        Self {
            persona,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl ContentBehavior for DryRunContent {
    async fn generate_and_post(&self) -> Result<Metric> {
        let character = self.persona.current();
        let post = compose_post(&character, &mut *self.rng.lock())?;
        info!("[dry-run] {} would post: {}", character.handle, post);
        Ok(Metric::posts(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::tests::ORACLE;

    fn oracle() -> Character {
        Character::from_json_str(ORACLE).unwrap()
    }

    #[test]
    fn test_compose_post_uses_persona() {
        let character = oracle();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let post = compose_post(&character, &mut rng).unwrap();
            let known = post == "The chart remembers."
                || post.contains("#prophecy")
                || post.contains("#markets");
            assert!(known, "unexpected post {}", post);
        }
    }

    #[test]
    fn test_compose_post_without_topics_fails() {
        let mut character = oracle();
        character.topics.clear();
        character.post_examples.clear();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(compose_post(&character, &mut rng).is_err());
    }

    #[test]
    fn test_compose_reply_from_examples() {
        let character = oracle();
        let mut rng = StdRng::seed_from_u64(3);
        let reply = compose_reply(&character, &mut rng).unwrap();
        assert!(reply == "The candles whisper." || reply == "gm, seeker");
    }

    #[tokio::test]
    async fn test_dry_run_behaviors_report_metrics() {
        let persona = SharedCharacter::new(oracle());

        let content = DryRunContent::with_seed(persona.clone(), 9);
        assert_eq!(content.generate_and_post().await.unwrap(), Metric::posts(1));

        let interaction = DryRunInteraction::with_seed(persona, 9);
        let metric = interaction.monitor_and_respond().await.unwrap();
        assert_eq!(metric.unit, "replies");
        assert!(metric.value <= 3.0);
    }
}
