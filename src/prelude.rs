pub(crate) use {
    std::{
        collections::{
            BTreeMap,
            HashMap,
            HashSet,
        },
        fmt,
        sync::Arc,
        time::Duration,
    },
    async_trait::async_trait,
    chrono::prelude::*,
    itertools::Itertools as _,
    lazy_regex::regex_captures,
    serde::Deserialize,
    serenity::{
        all::{
            ButtonStyle,
            CommandDataOptionValue,
            CommandInteraction,
            CommandOptionType,
            CommandType,
            ComponentInteraction,
            CreateButton,
            CreateCommand,
            CreateCommandOption,
            CreateInteractionResponse,
            CreateInteractionResponseMessage,
            Interaction,
            InteractionContext,
            Permissions,
        },
        model::prelude::*,
        prelude::{
            Context as DiscordCtx,
            TypeMapKey,
        },
        utils::MessageBuilder,
    },
    sqlx::{
        PgPool,
        Postgres,
        Row as _,
        Transaction,
    },
    tokio::{
        sync::mpsc,
        time::Instant,
    },
    wheel::traits::{
        IoResultExt as _,
        IsNetworkError,
        ReqwestResponseExt as _,
    },
    crate::{
        config::Config,
        ledger::{
            Ledger,
            MatchId,
            Outcome,
            ParticipationRow,
            PlayerSyncRecord,
            StatSnapshot,
            WinningSide,
        },
    },
};
