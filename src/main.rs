use anyhow::Context;
use clap::{Parser, Subcommand};
use grantwise_lib::models::{
    ChatContext, CreateChatPayload, MessageRole, NewOpportunity, NewOrganization, OrganizationRole,
    OrganizationType, ReviewOutcome, SaveContentPayload,
};
use grantwise_lib::{init_tracing, GrantsCore};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grantwise")]
#[command(about = "Grant eligibility scoring and application tracking")]
struct Cli {
    /// Directory holding the database and logs
    #[arg(long, env = "GRANTWISE_DATA_DIR", default_value = ".grantwise")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an organization
    OrgCreate {
        name: String,
        #[arg(long)]
        personal: bool,
        #[arg(long)]
        district_id: Option<String>,
    },
    /// Create a user in an organization
    UserCreate {
        email: String,
        #[arg(long)]
        org: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Upsert opportunities from a JSON file (one object or an array)
    Ingest { file: PathBuf },
    /// Score an opportunity for an organization
    Analyze {
        #[arg(long)]
        org: String,
        #[arg(long)]
        opportunity: i64,
    },
    /// Start an application draft
    Draft {
        #[arg(long)]
        org: String,
        #[arg(long)]
        opportunity: i64,
    },
    /// Save draft content from a JSON file
    Save {
        application: String,
        file: PathBuf,
        #[arg(long)]
        html: Option<String>,
    },
    /// Mark an in-progress application ready to submit
    Ready { application: String },
    Submit { application: String },
    /// Record a review outcome: acknowledged, awarded or rejected
    Review { application: String, outcome: String },
    Withdraw { application: String },
    Bookmark {
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: String,
        #[arg(long)]
        opportunity: i64,
        #[arg(long)]
        notes: Option<String>,
    },
    Unbookmark {
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: String,
        #[arg(long)]
        opportunity: i64,
    },
    /// Open a chat thread
    Chat {
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: String,
        #[arg(long, default_value = "GENERAL")]
        context: String,
        #[arg(long)]
        application: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Send a prompt to a chat and print the reply
    Say {
        chat: String,
        prompt: String,
        /// Append without asking the provider
        #[arg(long)]
        no_reply: bool,
    },
    /// Show settings, or merge a JSON patch into them
    Settings {
        #[arg(long)]
        set: Option<String>,
    },
    /// Replace the scoring policy with a YAML file
    ImportPolicy { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(error) = init_tracing(&cli.data_dir.join("logs")) {
        eprintln!("logging disabled: {}", error);
    }

    let core = GrantsCore::open(cli.data_dir.clone())
        .with_context(|| format!("failed to open data dir {}", cli.data_dir.display()))?;

    match cli.command {
        Command::OrgCreate {
            name,
            personal,
            district_id,
        } => print_json(&core.create_organization(&NewOrganization {
            name,
            slug: None,
            org_type: if personal {
                OrganizationType::Personal
            } else {
                OrganizationType::Organization
            },
            role: OrganizationRole::Owner,
            school_district_id: district_id,
        })?),
        Command::UserCreate { email, org, name } => {
            print_json(&core.create_user(&email, name.as_deref(), &org, false)?)
        }
        Command::Ingest { file } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            let payloads: Vec<NewOpportunity> = if value.is_array() {
                serde_json::from_value(value)?
            } else {
                vec![serde_json::from_value(value)?]
            };
            let mut stored = Vec::with_capacity(payloads.len());
            for payload in &payloads {
                stored.push(core.upsert_opportunity(payload)?);
            }
            print_json(&stored)
        }
        Command::Analyze { org, opportunity } => print_json(&core.analyze(&org, opportunity).await?),
        Command::Draft { org, opportunity } => print_json(&core.create_draft(opportunity, &org)?),
        Command::Save { application, file, html } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let payload = SaveContentPayload {
                content: serde_json::from_str(&raw)?,
                content_html: html,
                documents: None,
            };
            print_json(&core.save_content(&application, &payload)?)
        }
        Command::Ready { application } => print_json(&core.mark_ready_to_submit(&application)?),
        Command::Submit { application } => print_json(&core.submit(&application).await?),
        Command::Review { application, outcome } => {
            let outcome = ReviewOutcome::parse(&outcome)
                .with_context(|| format!("unknown review outcome '{}'", outcome))?;
            print_json(&core.advance_review(&application, outcome)?)
        }
        Command::Withdraw { application } => print_json(&core.withdraw(&application)?),
        Command::Bookmark {
            user,
            org,
            opportunity,
            notes,
        } => print_json(&core.bookmark(&user, &org, opportunity, notes.as_deref())?),
        Command::Unbookmark { user, org, opportunity } => print_json(&serde_json::json!({
            "removed": core.unbookmark(&user, &org, opportunity)?
        })),
        Command::Chat {
            user,
            org,
            context,
            application,
            title,
        } => {
            let context = ChatContext::parse(&context.to_ascii_uppercase())
                .with_context(|| format!("unknown chat context '{}'", context))?;
            print_json(&core.create_chat(&CreateChatPayload {
                organization_id: org,
                user_id: user,
                context,
                application_id: application,
                title,
            })?)
        }
        Command::Say { chat, prompt, no_reply } => {
            if no_reply {
                print_json(&core.append_message(&chat, MessageRole::User, &prompt, None)?)
            } else {
                print_json(&core.reply(&chat, &prompt).await?)
            }
        }
        Command::Settings { set } => match set {
            Some(patch) => print_json(&core.update_settings(serde_json::from_str(&patch)?)?),
            None => print_json(&core.get_settings()?),
        },
        Command::ImportPolicy { file } => print_json(&core.import_scoring_policy(&file)?),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
