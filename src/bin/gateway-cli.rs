use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use edge_gateway::config::load_config;
use edge_gateway::policy::{AuthorizationPolicy, RequiredAuthority};
use edge_gateway::routing::RequestRouter;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Operator tool for the edge gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a config file and print the compiled tables
    Check {
        #[arg(short, long, default_value = "gateway.toml")]
        config: PathBuf,
    },
    /// Query a running gateway's health endpoint
    Health {
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
    },
    /// Mint an HS256 development token
    Token {
        #[arg(long)]
        secret: String,
        #[arg(long, default_value = "http://keycloak:8080/realms/shop")]
        issuer: String,
        #[arg(long)]
        sub: String,
        /// Value of the `primary_role` claim
        #[arg(long)]
        role: Option<String>,
        /// Space-delimited `scp` claim
        #[arg(long)]
        scopes: Option<String>,
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => check(&config)?,
        Commands::Health { url } => {
            let res = reqwest::get(format!("{}/actuator/health", url.trim_end_matches('/'))).await?;
            print_response(res).await?;
        }
        Commands::Token {
            secret,
            issuer,
            sub,
            role,
            scopes,
            ttl_secs,
        } => {
            let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
            let mut claims = json!({
                "sub": sub,
                "iss": issuer,
                "iat": now,
                "exp": now + ttl_secs,
            });
            if let Some(role) = role {
                claims["primary_role"] = Value::String(role);
            }
            if let Some(scopes) = scopes {
                claims["scp"] = Value::String(scopes);
            }
            let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?;
            println!("{}", token);
        }
    }

    Ok(())
}

fn check(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    let router = RequestRouter::from_config(&config.routes, &config.rate_limit)?;
    let policy = AuthorizationPolicy::from_config(&config.auth)?;

    println!("Configuration OK: {}", path.display());
    println!("\nRoutes (first match wins):");
    for r in router.routes() {
        println!(
            "  {:<28} {:<24} -> {:<18} strip={} rate_limited={} ({} burst, {}/s)",
            r.id, r.pattern, r.upstream, r.strip_prefix, r.rate_limited, r.limits.capacity, r.limits.refill_per_sec
        );
    }

    println!("\nPublic paths:");
    for p in policy.public_paths() {
        println!("  {}", p);
    }

    println!("\nAuthorization rules (evaluation order):");
    for rule in policy.rules() {
        let method = rule.method.as_ref().map(|m| m.as_str()).unwrap_or("*");
        let required = match &rule.required {
            RequiredAuthority::Authenticated => "authenticated".to_string(),
            RequiredAuthority::AnyOf(set) => set.iter().map(|a| a.as_str()).collect::<Vec<_>>().join(" | "),
        };
        println!("  {:<7} {:<32} {}", method, rule.pattern, required);
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
