use {
    serenity_utils::builder::ErrorNotifier,
    crate::{
        ledger::PgLedger,
        mvp::MvpVoting,
        prelude::*,
        results::{
            self,
            MatchResults,
            PENDING_MATCHES_LIMIT,
        },
    },
};

enum DbPool {}

impl TypeMapKey for DbPool {
    type Value = PgPool;
}

enum Results {}

impl TypeMapKey for Results {
    type Value = MatchResults;
}

enum MvpVotingKey {}

impl TypeMapKey for MvpVotingKey {
    type Value = Option<Arc<dyn MvpVoting>>;
}

#[derive(Clone, Copy)]
struct CommandIds {
    record_match_result: CommandId,
    record_match_results: CommandId,
}

impl TypeMapKey for CommandIds {
    type Value = HashMap<GuildId, CommandIds>;
}

/// Button IDs. Match IDs always come last since they may contain underscores.
pub(crate) mod custom_id {
    use {
        std::num::NonZeroU64,
        crate::prelude::*,
    };

    #[derive(Debug, PartialEq, Eq)]
    pub(crate) enum Action {
        Record { match_id: MatchId, winning_side: WinningSide },
        StartMvpVoting(MatchId),
        MvpVote { candidate: UserId, match_id: MatchId },
    }

    pub(crate) fn record(match_id: &MatchId, winning_side: WinningSide) -> String {
        format!("result_{}_{match_id}", winning_side.number())
    }

    pub(crate) fn start_mvp_voting(match_id: &MatchId) -> String {
        format!("mvp_{match_id}")
    }

    pub(crate) fn mvp_vote(candidate: UserId, match_id: &MatchId) -> String {
        format!("mvpvote_{candidate}_{match_id}")
    }

    pub(crate) fn parse(custom_id: &str) -> Option<Action> {
        if let Some((_, team, match_id)) = regex_captures!("^result_([0-9]+)_(.+)$", custom_id) {
            Some(Action::Record {
                winning_side: WinningSide::try_from(team.parse::<i64>().ok()?).ok()?,
                match_id: MatchId::from(match_id),
            })
        } else if let Some((_, candidate, match_id)) = regex_captures!("^mvpvote_([0-9]+)_(.+)$", custom_id) {
            Some(Action::MvpVote {
                candidate: UserId::from(candidate.parse::<NonZeroU64>().ok()?),
                match_id: MatchId::from(match_id),
            })
        } else {
            custom_id.strip_prefix("mvp_").filter(|match_id| !match_id.is_empty()).map(|match_id| Action::StartMvpVoting(MatchId::from(match_id)))
        }
    }
}

fn has_admin_permissions(permissions: Option<Permissions>) -> bool {
    permissions.is_some_and(|permissions| permissions.administrator())
}

/// Records the results and builds the reply, including a button to start MVP voting for each recorded match.
async fn record_results(ctx: &DiscordCtx, results: Vec<(MatchId, i64)>) -> CreateInteractionResponseMessage {
    let (db_pool, match_results) = {
        let data = ctx.data.read().await;
        (
            data.get::<DbPool>().expect("database connection pool missing from Discord context").clone(),
            data.get::<Results>().expect("match results service missing from Discord context").clone(),
        )
    };
    let mut ledger = PgLedger::new(db_pool);
    match match_results.record(&mut ledger, results.clone()).await {
        Ok(reconciliation) => {
            let mut content = MessageBuilder::default();
            for (match_id, winning_team) in &results {
                content.push("Match ");
                content.push_safe(match_id.to_string());
                content.push_line(format!(" result recorded: Team {winning_team} wins!"));
            }
            content.push(format!("Updated stats for {} player{}. Would you like to start MVP voting?", reconciliation.players_updated, if reconciliation.players_updated == 1 { "" } else { "s" }));
            let mut response_msg = CreateInteractionResponseMessage::new()
                .ephemeral(false)
                .content(content.build());
            for match_id in results.into_iter().map(|(match_id, _)| match_id).unique() {
                response_msg = response_msg.button(CreateButton::new(custom_id::start_mvp_voting(&match_id)).label(format!("Start MVP voting: {match_id}")));
            }
            response_msg
        }
        Err(e) if e.is_user_error() => CreateInteractionResponseMessage::new()
            .ephemeral(true)
            .content(format!("Sorry, {e}.")),
        Err(e) => {
            log::error!("Error recording match results: {e} ({e:?})");
            CreateInteractionResponseMessage::new()
                .ephemeral(true)
                .content(format!("Error recording match results: {e}"))
        }
    }
}

async fn record_match_result(ctx: &DiscordCtx, interaction: &CommandInteraction) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut match_id = None;
    let mut winning_team = None;
    for option in &interaction.data.options {
        match (&*option.name, &option.value) {
            ("match-id", CommandDataOptionValue::String(id)) => match_id = Some(MatchId(id.trim().to_owned())),
            ("winning-team", CommandDataOptionValue::Integer(team)) => winning_team = Some(*team),
            (name, _) => panic!("unexpected slash command option {name:?}"),
        }
    }
    let (Some(match_id), Some(winning_team)) = (match_id, winning_team) else { panic!("missing required slash command option") };
    let response_msg = record_results(ctx, vec![(match_id, winning_team)]).await;
    interaction.create_response(ctx, CreateInteractionResponse::Message(response_msg)).await?;
    Ok(())
}

async fn list_pending_matches(ctx: &DiscordCtx, interaction: &CommandInteraction) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let db_pool = ctx.data.read().await.get::<DbPool>().expect("database connection pool missing from Discord context").clone();
    let mut ledger = PgLedger::new(db_pool);
    let pending = ledger.pending_matches(PENDING_MATCHES_LIMIT).await?;
    ledger.commit().await?;
    if pending.is_empty() {
        interaction.create_response(ctx, CreateInteractionResponse::Message(CreateInteractionResponseMessage::new()
            .ephemeral(true)
            .content("No pending matches found to record results for.")
        )).await?;
        return Ok(())
    }
    let mut response_msg = CreateInteractionResponseMessage::new()
        .ephemeral(true)
        .content(format!("Found {} match{} needing results. Click the team that won.", pending.len(), if pending.len() == 1 { "" } else { "es" }));
    for match_id in &pending {
        for winning_side in [WinningSide::Team1, WinningSide::Team2] {
            response_msg = response_msg.button(CreateButton::new(custom_id::record(match_id, winning_side))
                .label(format!("{match_id}: Team {} won", winning_side.number()))
                .style(ButtonStyle::Primary)
            );
        }
    }
    interaction.create_response(ctx, CreateInteractionResponse::Message(response_msg)).await?;
    Ok(())
}

async fn handle_component(ctx: &DiscordCtx, interaction: &ComponentInteraction) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match custom_id::parse(&interaction.data.custom_id) {
        Some(custom_id::Action::Record { match_id, winning_side }) => {
            if !has_admin_permissions(interaction.member.as_ref().and_then(|member| member.permissions)) {
                interaction.create_response(ctx, CreateInteractionResponse::Message(CreateInteractionResponseMessage::new()
                    .ephemeral(true)
                    .content("Sorry, you don't have required permission to use this command")
                )).await?;
                return Ok(())
            }
            let response_msg = record_results(ctx, vec![(match_id, winning_side.number().into())]).await;
            interaction.create_response(ctx, CreateInteractionResponse::Message(response_msg)).await?;
        }
        Some(custom_id::Action::StartMvpVoting(match_id)) => {
            let mvp_voting = ctx.data.read().await.get::<MvpVotingKey>().cloned().flatten();
            if let Some(mvp_voting) = mvp_voting {
                mvp_voting.start_voting(ctx, interaction, &match_id).await?;
            } else {
                interaction.create_response(ctx, CreateInteractionResponse::Message(CreateInteractionResponseMessage::new()
                    .ephemeral(true)
                    .content("MVP voting module not available. Please contact an administrator.")
                )).await?;
            }
        }
        Some(custom_id::Action::MvpVote { candidate, match_id }) => {
            let mvp_voting = ctx.data.read().await.get::<MvpVotingKey>().cloned().flatten();
            if let Some(mvp_voting) = mvp_voting {
                mvp_voting.cast_vote(ctx, interaction, &match_id, candidate).await?;
            } else {
                interaction.create_response(ctx, CreateInteractionResponse::Message(CreateInteractionResponseMessage::new()
                    .ephemeral(true)
                    .content("MVP voting module not available. Please contact an administrator.")
                )).await?;
            }
        }
        None => panic!("received message component interaction with unknown custom ID {:?}", interaction.data.custom_id),
    }
    Ok(())
}

pub(crate) fn configure_builder(discord_builder: serenity_utils::Builder, db_pool: PgPool, match_results: MatchResults, mvp_voting: Option<Arc<dyn MvpVoting>>, admin_user: UserId) -> serenity_utils::Builder {
    discord_builder
        .error_notifier(ErrorNotifier::User(admin_user))
        .data::<DbPool>(db_pool)
        .data::<Results>(match_results)
        .data::<MvpVotingKey>(mvp_voting)
        .on_guild_create(false, |ctx, guild, _| Box::pin(async move {
            let commands = guild.set_commands(ctx, vec![
                CreateCommand::new("record-match-result")
                    .kind(CommandType::ChatInput)
                    .add_context(InteractionContext::Guild)
                    .default_member_permissions(Permissions::ADMINISTRATOR)
                    .description("Records the outcome of a single match.")
                    .add_option(CreateCommandOption::new(
                        CommandOptionType::String,
                        "match-id",
                        "The ID of the match, as assigned by matchmaking.",
                    )
                        .required(true)
                    )
                    .add_option(CreateCommandOption::new(
                        CommandOptionType::Integer,
                        "winning-team",
                        "The number of the winning team (1 or 2).",
                    )
                        .min_int_value(1)
                        .max_int_value(2)
                        .required(true)
                    ),
                CreateCommand::new("record-match-results")
                    .kind(CommandType::ChatInput)
                    .add_context(InteractionContext::Guild)
                    .default_member_permissions(Permissions::ADMINISTRATOR)
                    .description("Records the outcomes of matches that don't have a result yet."),
            ]).await?;
            ctx.data.write().await.entry::<CommandIds>().or_default().insert(guild.id, CommandIds {
                record_match_result: commands[0].id,
                record_match_results: commands[1].id,
            });
            Ok(())
        }))
        .on_interaction_create(|ctx, interaction| Box::pin(async move {
            match interaction {
                Interaction::Command(interaction) => {
                    let guild_id = interaction.guild_id.expect("Discord slash command called outside of a guild");
                    let Some(&command_ids) = ctx.data.read().await.get::<CommandIds>().and_then(|command_ids| command_ids.get(&guild_id)) else {
                        panic!("Discord slash command called from unregistered guild")
                    };
                    if !has_admin_permissions(interaction.member.as_ref().and_then(|member| member.permissions)) {
                        interaction.create_response(ctx, CreateInteractionResponse::Message(CreateInteractionResponseMessage::new()
                            .ephemeral(true)
                            .content("Sorry, you don't have required permission to use this command")
                        )).await?;
                    } else if interaction.data.id == command_ids.record_match_result {
                        record_match_result(ctx, interaction).await?;
                    } else if interaction.data.id == command_ids.record_match_results {
                        list_pending_matches(ctx, interaction).await?;
                    } else {
                        panic!("unexpected slash command")
                    }
                }
                Interaction::Component(interaction) => handle_component(ctx, interaction).await?,
                _ => {}
            }
            Ok(())
        }))
}
