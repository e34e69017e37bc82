use anyhow::Result;
use clap::{Parser, Subcommand};
use server_api::auth::{issue_token, SessionConfig, DEFAULT_TOKEN_TTL_SECONDS};
use shared::domain::UserId;
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/chat.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
        full_name: String,
        #[arg(long)]
        profile_pic: Option<String>,
    },
    ListUsers {
        /// Hide this user from the listing.
        #[arg(long, default_value_t = 0)]
        except: i64,
    },
    IssueToken {
        user_id: i64,
        #[arg(long, env = "JWT_SECRET")]
        secret: String,
        #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECONDS)]
        ttl_seconds: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::CreateUser {
            username,
            full_name,
            profile_pic,
        } => {
            let storage = Storage::new(&cli.database_url).await?;
            let user_id = storage
                .create_user(&username, &full_name, profile_pic.as_deref())
                .await?;
            println!("created user_id={user_id}");
        }
        Command::ListUsers { except } => {
            let storage = Storage::new(&cli.database_url).await?;
            for user in storage.list_users_except(UserId(except)).await? {
                println!("{}\t{}\t{}", user.user_id, user.username, user.full_name);
            }
        }
        Command::IssueToken {
            user_id,
            secret,
            ttl_seconds,
        } => {
            let storage = Storage::new(&cli.database_url).await?;
            if storage.get_user(UserId(user_id)).await?.is_none() {
                anyhow::bail!("no user with id {user_id}");
            }
            let token = issue_token(
                &SessionConfig {
                    secret,
                    ttl_seconds,
                },
                UserId(user_id),
            )?;
            println!("{token}");
        }
    }

    Ok(())
}
