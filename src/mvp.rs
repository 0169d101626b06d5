//! Post-match MVP voting.

use crate::{
    discord_bot::custom_id,
    ledger::{
        user_id_from_db,
        user_id_to_db,
    },
    prelude::*,
};

/// Discord allows at most 25 buttons per message.
const MAX_CANDIDATES: usize = 25;

/// Runs the MVP vote for a recorded match.
///
/// The Discord handler holds one of these from startup; recording results works without it.
#[async_trait]
pub(crate) trait MvpVoting: Send + Sync {
    async fn start_voting(&self, ctx: &DiscordCtx, interaction: &ComponentInteraction, match_id: &MatchId) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    async fn cast_vote(&self, ctx: &DiscordCtx, interaction: &ComponentInteraction, match_id: &MatchId, candidate: UserId) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A ballot message with one button per player on either team, with votes stored in `mvp_votes`.
pub(crate) struct MvpBallot {
    db_pool: PgPool,
}

impl MvpBallot {
    pub(crate) fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

struct Candidate {
    user_id: UserId,
    name: Option<String>,
}

/// Why a vote is refused, if it is.
fn vote_rejection(players: &[UserId], voter: UserId, candidate: UserId) -> Option<&'static str> {
    if !players.contains(&voter) {
        Some("Sorry, only players of this match can vote.")
    } else if voter == candidate {
        Some("Sorry, you can't vote for yourself.")
    } else if !players.contains(&candidate) {
        Some("Sorry, that player didn't play in this match.")
    } else {
        None
    }
}

async fn candidates(transaction: &mut Transaction<'_, Postgres>, match_id: &MatchId) -> sqlx::Result<Vec<Candidate>> {
    let rows = sqlx::query("
        SELECT m.user_id, p.game_name
        FROM matches m
        LEFT JOIN player p ON p.user_id = m.user_id
        WHERE m.match_id = $1 AND m.side IN ($2, $3)
        ORDER BY m.side, m.user_id
    ")
        .bind(&match_id.0)
        .bind(WinningSide::Team1.label())
        .bind(WinningSide::Team2.label())
        .fetch_all(&mut **transaction).await?;
    rows.into_iter().map(|row| -> sqlx::Result<_> {
        Ok(Candidate {
            user_id: user_id_from_db(row.try_get("user_id")?)?,
            name: row.try_get("game_name")?,
        })
    }).collect()
}

#[async_trait]
impl MvpVoting for MvpBallot {
    async fn start_voting(&self, ctx: &DiscordCtx, interaction: &ComponentInteraction, match_id: &MatchId) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut transaction = self.db_pool.begin().await?;
        let candidates = candidates(&mut transaction, match_id).await?;
        transaction.commit().await?;
        if candidates.is_empty() {
            interaction.create_response(ctx, CreateInteractionResponse::Message(CreateInteractionResponseMessage::new()
                .ephemeral(true)
                .content(format!("Match {match_id} has no players to vote for."))
            )).await?;
            return Ok(())
        }
        let mut response_msg = CreateInteractionResponseMessage::new()
            .ephemeral(false)
            .content(MessageBuilder::default()
                .push("MVP voting for match ")
                .push_safe(match_id.to_string())
                .push(" is open! Players of the match can vote for anyone except themselves.")
                .build()
            );
        for candidate in candidates.into_iter().take(MAX_CANDIDATES) {
            let label = candidate.name.unwrap_or_else(|| candidate.user_id.to_string());
            response_msg = response_msg.button(CreateButton::new(custom_id::mvp_vote(candidate.user_id, match_id)).label(label).style(ButtonStyle::Secondary));
        }
        interaction.create_response(ctx, CreateInteractionResponse::Message(response_msg)).await?;
        Ok(())
    }

    async fn cast_vote(&self, ctx: &DiscordCtx, interaction: &ComponentInteraction, match_id: &MatchId, candidate: UserId) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let voter = interaction.user.id;
        let mut transaction = self.db_pool.begin().await?;
        let players = candidates(&mut transaction, match_id).await?.into_iter().map(|player| player.user_id).collect_vec();
        let content = if let Some(rejection) = vote_rejection(&players, voter, candidate) {
            rejection.to_owned()
        } else {
            sqlx::query("
                INSERT INTO mvp_votes (match_id, voter_id, candidate_id) VALUES ($1, $2, $3)
                ON CONFLICT (match_id, voter_id) DO UPDATE SET candidate_id = EXCLUDED.candidate_id, voted_at = NOW()
            ")
                .bind(&match_id.0)
                .bind(user_id_to_db(voter))
                .bind(user_id_to_db(candidate))
                .execute(&mut *transaction).await?;
            format!("Your MVP vote for match {match_id} has been recorded.")
        };
        transaction.commit().await?;
        interaction.create_response(ctx, CreateInteractionResponse::Message(CreateInteractionResponseMessage::new()
            .ephemeral(true)
            .content(content)
        )).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_rules() {
        let players = [UserId::new(1), UserId::new(2), UserId::new(3)];
        assert_eq!(vote_rejection(&players, UserId::new(1), UserId::new(2)), None);
        assert_eq!(vote_rejection(&players, UserId::new(2), UserId::new(2)), Some("Sorry, you can't vote for yourself."));
        assert_eq!(vote_rejection(&players, UserId::new(9), UserId::new(2)), Some("Sorry, only players of this match can vote."));
        assert_eq!(vote_rejection(&players, UserId::new(1), UserId::new(9)), Some("Sorry, that player didn't play in this match."));
        assert!(vote_rejection(&[], UserId::new(1), UserId::new(2)).is_some());
    }
}
