//! agent-chat
//!
//! Interactive terminal chat with a tool-calling agent. Picks a provider and
//! an agent policy from the command line, registers the built-in math and date
//! tools, and reads questions from stdin until `exit`.

use std::io::Write;

use agent_core::{
    Agent, AgentBuilder, AgentConfig, AgentState, ChatBackend, ChatSession, ToolRegistry, builtin,
};
use agent_runtime::{
    AnthropicBackend, AnthropicConfig, AzureOpenAiConfig, JsonConventionBackend,
    JsonConventionConfig, OpenAiBackend, OpenAiConfig, ToolFormat,
};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Provider {
    Openai,
    Azure,
    Anthropic,
    AnthropicXml,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AgentKind {
    Conversational,
    Functions,
    FunctionsOnly,
    React,
}

#[derive(Parser)]
#[command(name = "agent-chat", about = "Chat with a tool-calling agent", version)]
struct Cli {
    /// Chat model provider
    #[arg(short, long, value_enum, default_value = "openai")]
    provider: Provider,

    /// Model name (provider default when omitted)
    #[arg(short, long)]
    model: Option<String>,

    /// Agent policy
    #[arg(short, long, value_enum, default_value = "functions")]
    agent: AgentKind,

    /// Override the provider's context window
    #[arg(long)]
    max_context_tokens: Option<usize>,

    /// Maximum tool round-trips per question
    #[arg(long, env = "AGENT_MAX_FUNCTION_CALLS")]
    max_function_calls: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn agent_config(cli: &Cli) -> AgentConfig {
    let config = match cli.agent {
        AgentKind::Conversational => AgentConfig::conversational(),
        AgentKind::Functions => AgentConfig::functions(),
        AgentKind::FunctionsOnly => AgentConfig::functions_only(),
        AgentKind::React => AgentConfig::react(),
    };
    match cli.max_function_calls {
        Some(max) => config.with_max_function_calls(max),
        None => config,
    }
}

fn build_agent<B: ChatBackend + 'static>(backend: B, cli: &Cli, tools: ToolRegistry) -> anyhow::Result<Agent> {
    let mut session = ChatSession::new(backend, "");
    if let Some(max) = cli.max_context_tokens {
        session = session.with_max_context_tokens(max);
    }
    let agent = AgentBuilder::new()
        .model(session)
        .tools(tools)
        .config(agent_config(cli))
        .build()?;
    Ok(agent)
}

fn create_agent(cli: &Cli) -> anyhow::Result<Agent> {
    let mut tools = ToolRegistry::new();
    builtin::register_all(&mut tools)?;

    match cli.provider {
        Provider::Openai => {
            let mut config = OpenAiConfig::from_env()?;
            if let Some(model) = &cli.model {
                config = config.with_model(model);
            }
            build_agent(OpenAiBackend::new(config)?, cli, tools)
        }
        Provider::Azure => {
            let mut config = AzureOpenAiConfig::from_env();
            if let Some(model) = &cli.model {
                config.model.clone_from(model);
            }
            build_agent(OpenAiBackend::azure(config)?, cli, tools)
        }
        Provider::Anthropic | Provider::AnthropicXml => {
            let format = if matches!(cli.provider, Provider::AnthropicXml) {
                ToolFormat::Xml
            } else {
                ToolFormat::Native
            };
            let mut config = AnthropicConfig::from_env()?.with_tool_format(format);
            if let Some(model) = &cli.model {
                config = config.with_model(model);
            }
            build_agent(AnthropicBackend::new(config)?, cli, tools)
        }
        Provider::Json => {
            let mut config = JsonConventionConfig::from_env()?;
            if let Some(model) = &cli.model {
                config = config.with_model(model);
            }
            build_agent(JsonConventionBackend::new(config)?, cli, tools)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut agent = create_agent(&cli)?;
    tracing::info!(
        provider = ?cli.provider,
        agent = ?cli.agent,
        tools = agent.tools().len(),
        "Agent ready"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            break;
        }

        match agent.ask(question).await {
            Ok(answer) => println!("{answer}"),
            Err(e) => {
                tracing::warn!(error = %e, "Turn failed");
                println!("{}", e.user_message());
            }
        }

        if agent.state() == AgentState::Complete {
            agent.reset();
        }
    }

    Ok(())
}
