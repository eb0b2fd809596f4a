//! presence: command-line client for the presenced HTTP API.
//!
//! # Subcommands
//! - `register <name> <image>`  enroll a face under `name`
//! - `login <image>`            check in
//! - `logout <image>`           check out
//! - `logs [-o <path>]`         download the attendance archive
//! - `users`                    list enrolled identities
//! - `status`                   show daemon status

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

#[derive(Debug, Parser)]
#[command(name = "presence", version, about = "Face attendance client")]
struct Cli {
    /// presenced HTTP server URL
    #[arg(long, env = "PRESENCE_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Enroll a face image under a name
    Register {
        /// Identity to enroll (also the stored file name)
        name: String,
        /// Image containing the face
        image: PathBuf,
    },
    /// Check in with a face image
    Login {
        image: PathBuf,
    },
    /// Check out with a face image
    Logout {
        image: PathBuf,
    },
    /// Download every attendance log as a zip archive
    Logs {
        /// Where to write the archive
        #[arg(short, long, default_value = "out.zip")]
        output: PathBuf,
    },
    /// List enrolled identities
    Users,
    /// Show daemon status
    Status,
}

#[derive(Debug, Deserialize)]
struct MatchResponse {
    user: String,
    match_status: bool,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    registration_status: u16,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    users: Vec<String>,
}

struct Client {
    http: reqwest::Client,
    server: String,
}

impl Client {
    fn new(server: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            server: server.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    async fn register(&self, name: &str, image: &Path) -> Result<()> {
        let form = image_form(image).await?.text("text", name.to_string());
        let resp = self
            .http
            .post(self.url("/register_new_user"))
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("connect to {}", self.server))?;

        let body: RegistrationResponse = resp.json().await.context("parse registration response")?;
        if body.registration_status != 200 {
            bail!(
                "registration failed ({}): {}",
                body.registration_status,
                body.error.unwrap_or_default()
            );
        }
        println!("Registered {name}");
        Ok(())
    }

    async fn check(&self, path: &str, image: &Path) -> Result<MatchResponse> {
        let resp = self
            .http
            .post(self.url(path))
            .multipart(image_form(image).await?)
            .send()
            .await
            .with_context(|| format!("connect to {}", self.server))?;
        json_or_error(resp).await
    }

    async fn logs(&self, output: &Path) -> Result<()> {
        let resp = self
            .http
            .get(self.url("/get_attendance_logs"))
            .send()
            .await
            .with_context(|| format!("connect to {}", self.server))?;
        if !resp.status().is_success() {
            bail!("server returned {}", resp.status());
        }
        let bytes = resp.bytes().await?;
        tokio::fs::write(output, &bytes)
            .await
            .with_context(|| format!("write {}", output.display()))?;
        println!("Wrote {} ({} bytes)", output.display(), bytes.len());
        Ok(())
    }

    async fn users(&self) -> Result<()> {
        let resp = self
            .http
            .get(self.url("/users"))
            .send()
            .await
            .with_context(|| format!("connect to {}", self.server))?;
        let body: UsersResponse = json_or_error(resp).await?;
        if body.users.is_empty() {
            println!("No users enrolled");
        }
        for user in body.users {
            println!("{user}");
        }
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let resp = self
            .http
            .get(self.url("/status"))
            .send()
            .await
            .with_context(|| format!("cannot reach {}", self.server))?;
        let body: serde_json::Value = json_or_error(resp).await?;
        println!("presenced:  {}", self.server);
        println!("Version:    {}", body["version"].as_str().unwrap_or("?"));
        println!("Enrolled:   {}", body["enrolled"]);
        println!("Comparison: {}", body["comparison"]);
        Ok(())
    }
}

async fn image_form(path: &Path) -> Result<Form> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(Form::new().part("file", Part::bytes(bytes).file_name(file_name)))
}

async fn json_or_error<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let message = match resp.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => String::new(),
        };
        bail!("server returned {status}: {message}");
    }
    Ok(resp.json().await?)
}

fn describe(action: &str, result: &MatchResponse) -> String {
    if result.match_status {
        format!("{action} recorded for {}", result.user)
    } else {
        match result.user.as_str() {
            "no_persons_found" => "No face found in the image".to_string(),
            _ => "Face not recognized".to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server)?;
    tracing::debug!(server = %client.server, "using presenced");

    match cli.command {
        Commands::Register { name, image } => client.register(&name, &image).await?,
        Commands::Login { image } => {
            let result = client.check("/login", &image).await?;
            println!("{}", describe("Check-in", &result));
        }
        Commands::Logout { image } => {
            let result = client.check("/logout", &image).await?;
            println!("{}", describe("Check-out", &result));
        }
        Commands::Logs { output } => client.logs(&output).await?,
        Commands::Users => client.users().await?,
        Commands::Status => client.status().await?,
    }

    Ok(())
}
