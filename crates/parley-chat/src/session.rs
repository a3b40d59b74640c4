//! Chat session — conversation state plus one exchange at a time.
//!
//! Every exchange binds its provider (the registry's active provider unless
//! the request names another) while it holds the exchange lock, so the reply
//! always reports the provider that produced it. Each exchange resolves or
//! creates its conversation, replays prior turns, calls the model (running
//! requested tools in between when the request opts in) and appends exactly
//! one turn to the store, whether the call succeeded or not.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use parley_core::config::schema::ChatConfig;
use parley_core::error::{GatewayError, Result};
use parley_core::protocol::ProviderSummary;
use parley_core::store::ConversationStore;
use parley_core::types::{ChatLog, ChatReply, Conversation, Message, ToolDefinition, UsageStats};
use parley_core::utils::truncate_string;
use parley_providers::{BoundProvider, ChatModel, ModelReply, ProviderRegistry};

use crate::context::ContextBuilder;
use crate::tools::ToolRegistry;

/// Max characters of the first message used as a conversation title.
const TITLE_LEN: usize = 60;

/// Reply when the model keeps calling tools until the round limit.
const NO_ANSWER: &str = "I've completed processing but have no response to give.";

/// Whether an exchange is currently open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Streaming,
}

/// Reply fragments in emission order.
pub type ReplyStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// A streamed reply, the conversation it belongs to and the provider
/// producing it.
pub struct StreamedReply {
    pub conversation_id: u64,
    pub provider: ProviderSummary,
    pub fragments: ReplyStream,
}

/// Per-exchange request options.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExchangeOptions<'a> {
    pub conversation_id: Option<u64>,
    pub system_prompt: Option<&'a str>,
    /// Provider entry id or vendor kind; `None` runs against the active
    /// provider.
    pub provider_id: Option<&'a str>,
    /// Offer the enabled tools to the model.
    pub use_tools: bool,
}

/// The provider entry and model handle an exchange runs against.
struct Binding {
    provider: BoundProvider,
    model: Arc<dyn ChatModel>,
}

impl Binding {
    fn summary(&self) -> ProviderSummary {
        ProviderSummary {
            id: self.provider.config.id.clone(),
            name: self.provider.config.name.clone(),
            model: self.provider.config.model_name.clone(),
        }
    }
}

/// Everything resolved before the model is called.
struct Prepared {
    conversation: Conversation,
    system_prompt: String,
    messages: Vec<Message>,
}

/// Tools offered during one exchange.
#[derive(Clone)]
struct ToolSet {
    registry: Arc<ToolRegistry>,
    definitions: Vec<ToolDefinition>,
    max_iterations: usize,
}

// ─────────────────────────────────────────────
// ChatSession
// ─────────────────────────────────────────────

pub struct ChatSession {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn ConversationStore>,
    context: ContextBuilder,
    default_system_prompt: String,
    tools: Arc<ToolRegistry>,
    max_tool_iterations: usize,
    /// Written only while the exchange lock is held.
    binding: RwLock<Arc<Binding>>,
    /// Held for the whole of an exchange, including a streamed reply.
    exchange: Arc<Mutex<()>>,
}

impl ChatSession {
    /// Create a session bound to the registry's active provider.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn ConversationStore>,
        config: &ChatConfig,
    ) -> Result<Self> {
        let provider = registry.bind(None)?;
        let model = provider.strategy.create_model(&provider.config)?;
        Ok(Self::with_binding(registry, store, config, provider, model))
    }

    /// Create a session with an already built model handle.
    pub fn with_binding(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn ConversationStore>,
        config: &ChatConfig,
        provider: BoundProvider,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            registry,
            store,
            context: ContextBuilder::new(config.history_limit),
            default_system_prompt: config.default_system_prompt.clone(),
            tools: Arc::new(ToolRegistry::with_builtins(&config.tools.enabled)),
            max_tool_iterations: config.tools.max_iterations.max(1),
            binding: RwLock::new(Arc::new(Binding { provider, model })),
            exchange: Arc::new(Mutex::new(())),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        match self.exchange.try_lock() {
            Ok(_) => SessionPhase::Idle,
            Err(_) => SessionPhase::Streaming,
        }
    }

    /// The provider the last exchange ran against.
    pub async fn provider(&self) -> ProviderSummary {
        self.binding.read().await.summary()
    }

    /// Names of the tools a `use_tools` exchange offers.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.tool_names()
    }

    // ────────────── Exchanges ──────────────

    /// Send a message and wait for the whole reply.
    ///
    /// A failed model call is still logged as one turn with the error text as
    /// reply and zeroed usage, then returned as `Upstream`.
    pub async fn send_message(&self, text: &str, options: ExchangeOptions<'_>) -> Result<ChatReply> {
        let _guard = self.begin()?;
        let binding = self.bind(options.provider_id).await?;
        let prepared = self
            .prepare(text, options.conversation_id, options.system_prompt)
            .await?;
        let conversation_id = prepared.conversation.id;
        let tools = self.tool_set(options.use_tools);

        match complete(&binding, prepared.messages.clone(), tools.as_ref()).await {
            Ok((reply, usage)) => {
                let turn = ChatLog::new(
                    conversation_id,
                    &binding.provider.config.id,
                    &prepared.system_prompt,
                    text,
                    &reply,
                    usage,
                );
                self.store.append_turn(turn).await?;
                log_exchange(&binding.provider, conversation_id, usage);
                Ok(ChatReply {
                    reply,
                    usage,
                    conversation_id,
                    provider: binding.summary(),
                })
            }
            Err(e) => {
                let message = match e {
                    GatewayError::Upstream(msg) => msg,
                    other => other.to_string(),
                };
                error!(
                    provider = %binding.provider.config.id,
                    conversation_id,
                    error = %message,
                    "Chat exchange failed"
                );
                record_turn(
                    self.store.as_ref(),
                    &binding.provider,
                    &prepared,
                    text,
                    format!("Error: {message}"),
                    UsageStats::zero(),
                )
                .await;
                Err(GatewayError::Upstream(message))
            }
        }
    }

    /// Send a message and stream the reply.
    ///
    /// Provider binding and conversation lookup happen before this returns;
    /// model errors never fail the call and instead arrive as a final
    /// `"Error: <message>"` fragment. The turn is logged when the stream
    /// ends, with zeroed usage. A stream dropped before its end logs nothing.
    /// With `use_tools` the tool rounds run first and the final answer
    /// arrives as one fragment, logged with its real usage. The session
    /// stays in [`SessionPhase::Streaming`] until the returned stream is
    /// finished or dropped.
    pub async fn stream_message(
        &self,
        text: &str,
        options: ExchangeOptions<'_>,
    ) -> Result<StreamedReply> {
        let guard = self.begin()?;
        let binding = self.bind(options.provider_id).await?;
        let prepared = self
            .prepare(text, options.conversation_id, options.system_prompt)
            .await?;
        let conversation_id = prepared.conversation.id;
        let provider = binding.summary();
        let tools = self.tool_set(options.use_tools);
        let store = self.store.clone();
        let user_text = text.to_string();

        let fragments = async_stream::stream! {
            let _guard: OwnedMutexGuard<()> = guard;

            let (logged, usage) = if let Some(tools) = tools {
                match complete(&binding, prepared.messages.clone(), Some(&tools)).await {
                    Ok((reply, usage)) => {
                        log_exchange(&binding.provider, conversation_id, usage);
                        if !reply.is_empty() {
                            yield reply.clone();
                        }
                        (reply, usage)
                    }
                    Err(e) => {
                        error!(
                            provider = %binding.provider.config.id,
                            conversation_id,
                            error = %e,
                            "Chat exchange failed"
                        );
                        let message = format!("Error: {e}");
                        yield message.clone();
                        (message, UsageStats::zero())
                    }
                }
            } else {
                let mut reply = String::new();
                let failure = match binding.model.stream(&prepared.messages).await {
                    Ok(mut upstream) => {
                        let mut failure = None;
                        while let Some(item) = upstream.next().await {
                            match item {
                                Ok(fragment) if fragment.is_empty() => continue,
                                Ok(fragment) => {
                                    reply.push_str(&fragment);
                                    yield fragment;
                                }
                                Err(e) => {
                                    failure = Some(e);
                                    break;
                                }
                            }
                        }
                        failure
                    }
                    Err(e) => Some(e),
                };

                match failure {
                    None => {
                        log_exchange(&binding.provider, conversation_id, UsageStats::zero());
                        (reply, UsageStats::zero())
                    }
                    Some(e) => {
                        error!(
                            provider = %binding.provider.config.id,
                            conversation_id,
                            error = %e,
                            "Chat stream failed"
                        );
                        let message = format!("Error: {e}");
                        yield message.clone();
                        (message, UsageStats::zero())
                    }
                }
            };

            record_turn(store.as_ref(), &binding.provider, &prepared, &user_text, logged, usage).await;
        };

        Ok(StreamedReply {
            conversation_id,
            provider,
            fragments: Box::pin(fragments),
        })
    }

    // ────────────── Internals ──────────────

    fn begin(&self) -> Result<OwnedMutexGuard<()>> {
        self.exchange
            .clone()
            .try_lock_owned()
            .map_err(|_| GatewayError::Protocol("A chat exchange is already in progress".into()))
    }

    /// Bind the provider for the exchange about to run. Callers hold the
    /// exchange lock.
    ///
    /// Keeps the current model handle when the selection does not change.
    async fn bind(&self, provider_id: Option<&str>) -> Result<Arc<Binding>> {
        let provider = self.registry.bind(provider_id)?;
        let mut current = self.binding.write().await;
        if current.provider.config.id == provider.config.id {
            return Ok(current.clone());
        }

        let model = provider.strategy.create_model(&provider.config)?;
        info!(
            provider = %provider.config.id,
            model = %model.model_name(),
            "Chat provider selected"
        );
        *current = Arc::new(Binding { provider, model });
        Ok(current.clone())
    }

    fn tool_set(&self, use_tools: bool) -> Option<ToolSet> {
        if !use_tools {
            return None;
        }
        if self.tools.is_empty() {
            warn!("Tools requested but none are enabled");
            return None;
        }
        Some(ToolSet {
            registry: self.tools.clone(),
            definitions: self.tools.definitions(),
            max_iterations: self.max_tool_iterations,
        })
    }

    async fn prepare(
        &self,
        text: &str,
        conversation_id: Option<u64>,
        system_prompt: Option<&str>,
    ) -> Result<Prepared> {
        let conversation = match conversation_id {
            Some(id) => match self.store.get_conversation(id).await? {
                Some(conversation) => conversation,
                None => {
                    warn!(conversation_id = id, "Unknown conversation, starting a new one");
                    self.create_conversation(text, system_prompt).await?
                }
            },
            None => self.create_conversation(text, system_prompt).await?,
        };

        let system_prompt =
            ContextBuilder::effective_system_prompt(system_prompt, &conversation).to_string();
        let turns = self.store.list_turns(conversation.id).await?;
        let messages = self.context.build_messages(&system_prompt, &turns, text);

        Ok(Prepared {
            conversation,
            system_prompt,
            messages,
        })
    }

    async fn create_conversation(
        &self,
        first_message: &str,
        system_prompt: Option<&str>,
    ) -> Result<Conversation> {
        let prompt = system_prompt
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.default_system_prompt);
        let title = Some(truncate_string(first_message.trim(), TITLE_LEN));
        let conversation = self.store.create_conversation(title, prompt).await?;
        debug!(conversation_id = conversation.id, "Conversation created");
        Ok(conversation)
    }
}

/// Call the model until it answers with text, running the tools it asks for
/// in between. Usage is summed over every round.
async fn complete(
    binding: &Binding,
    mut messages: Vec<Message>,
    tools: Option<&ToolSet>,
) -> Result<(String, UsageStats)> {
    let Some(tools) = tools else {
        let reply = binding.model.invoke(&messages).await?;
        let usage = binding.provider.strategy.extract_usage(&reply.raw);
        return Ok((reply.content, usage));
    };

    let mut usage = UsageStats::zero();
    for round in 0..tools.max_iterations {
        let reply = binding
            .model
            .invoke_with_tools(&messages, &tools.definitions)
            .await?;
        usage.accumulate(binding.provider.strategy.extract_usage(&reply.raw));

        let ModelReply {
            content,
            tool_calls,
            ..
        } = reply;
        if tool_calls.is_empty() {
            return Ok((content, usage));
        }

        messages.push(Message::tool_calls(content, tool_calls.clone()));
        for call in &tool_calls {
            info!(tool = %call.function.name, round, "Executing tool call");
            let result = tools.registry.execute_call(call).await;
            debug!(tool = %call.function.name, result_len = result.len(), "Tool result");
            messages.push(Message::tool_result(&call.id, result));
        }
    }

    warn!(
        provider = %binding.provider.config.id,
        rounds = tools.max_iterations,
        "Tool rounds exhausted without a final answer"
    );
    Ok((NO_ANSWER.to_string(), usage))
}

/// Append a turn; failures are logged, not returned.
async fn record_turn(
    store: &dyn ConversationStore,
    provider: &BoundProvider,
    prepared: &Prepared,
    user_text: &str,
    reply: String,
    usage: UsageStats,
) {
    let turn = ChatLog::new(
        prepared.conversation.id,
        &provider.config.id,
        &prepared.system_prompt,
        user_text,
        reply,
        usage,
    );
    if let Err(e) = store.append_turn(turn).await {
        warn!(
            conversation_id = prepared.conversation.id,
            error = %e,
            "Failed to log chat turn"
        );
    }
}

fn log_exchange(provider: &BoundProvider, conversation_id: u64, usage: UsageStats) {
    info!(
        provider = %provider.config.id,
        conversation_id,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        total_tokens = usage.total_tokens,
        cost = usage.cost(&provider.config),
        "Chat exchange complete"
    );
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
