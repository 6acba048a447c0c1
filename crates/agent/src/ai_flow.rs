//! Catalog-grounded LLM replies.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use relaydesk_core::{BotConfig, Message, SenderKind};

use crate::calls::{bounded, CallError};
use crate::catalog::{product_line, CatalogPage};
use crate::llm::{ChatMessage, LlmClient};

pub const INACTIVE_REPLY: &str = "Olá! No momento estou indisponível. Por favor, aguarde que um \
atendente irá te responder em breve.";
pub const DEFAULT_PERSONA: &str = "Você é um assistente de atendimento profissional e prestativo.";
pub const IMAGE_INSTRUCTION: &str =
    "[O usuário enviou uma imagem. Analise a imagem e responda adequadamente.]";
pub const ERROR_FALLBACK_REPLY: &str = "Desculpe, ocorreu um erro ao processar sua mensagem. Um \
atendente irá te ajudar em breve.";
pub const EMPTY_COMPLETION_REPLY: &str = "Desculpe, não consegui processar sua mensagem.";
pub const NEGOTIATING_BANNER: &str = "⏳ Já pedi para um atendente humano assumir o seu \
atendimento. Enquanto isso, sigo te ajudando por aqui:\n\n";
const DIRECT_STATEMENT: &str = " Um de nossos atendentes pode complementar essas informações.";
const NO_PRODUCTS_CONTEXT: &str = "Nenhum produto relacionado foi recuperado do catálogo.";

const CATALOG_RULES: &str = "REGRAS DO CATÁLOGO:\n\
- Sempre informe o preço e a disponibilidade dos itens listados no contexto de produtos.\n\
- Nunca diga que não temos um produto; diga que um atendente vai confirmar e dar continuidade.\n\
- Nunca pergunte se o cliente quer ser transferido; quando for o caso, afirme diretamente que um \
atendente vai ajudar.";

/// Image attached to the current turn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageTurn {
    pub url: String,
    pub hints: Vec<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct AiTurn<'a> {
    pub bot_config: Option<&'a BotConfig>,
    pub first_name: Option<&'a str>,
    /// Earlier messages, oldest first, without the current one.
    pub history: &'a [Message],
    pub user_message: &'a str,
    pub image: Option<&'a ImageTurn>,
    pub catalog: Option<&'a CatalogPage>,
    pub negotiating: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AiOutcome {
    /// The bot is switched off for the workspace; the LLM was not called.
    Inactive(String),
    Generated(String),
}

impl AiOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Inactive(text) | Self::Generated(text) => text,
        }
    }
}

#[derive(Clone)]
pub struct AiResponder {
    llm: Arc<dyn LlmClient>,
    history_turns: usize,
    call_timeout: Duration,
}

impl AiResponder {
    pub fn new(llm: Arc<dyn LlmClient>, history_turns: usize, call_timeout: Duration) -> Self {
        Self { llm, history_turns, call_timeout }
    }

    pub async fn respond(&self, turn: &AiTurn<'_>) -> Result<AiOutcome, CallError> {
        if !turn.bot_config.is_some_and(|config| config.is_active) {
            return Ok(AiOutcome::Inactive(INACTIVE_REPLY.to_owned()));
        }

        let messages = self.build_messages(turn);
        let raw = bounded("llm.complete", self.call_timeout, self.llm.complete(&messages)).await?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(AiOutcome::Generated(EMPTY_COMPLETION_REPLY.to_owned()));
        }

        let reply =
            if turn.negotiating { raw.to_owned() } else { strip_transfer_questions(raw) };
        Ok(AiOutcome::Generated(reply))
    }

    /// Persona, catalog context, trailing history and the current turn.
    pub fn build_messages(&self, turn: &AiTurn<'_>) -> Vec<ChatMessage> {
        let mut messages = vec![
            ChatMessage::system(system_prompt(turn)),
            ChatMessage::system(product_context(turn.catalog)),
        ];

        let skip = turn.history.len().saturating_sub(self.history_turns);
        messages.extend(turn.history[skip..].iter().map(|message| match message.sender {
            SenderKind::Contact => ChatMessage::user(message.content.clone()),
            SenderKind::Bot | SenderKind::Agent => ChatMessage::assistant(message.content.clone()),
        }));

        messages.push(match turn.image {
            Some(image) => ChatMessage::user_with_image(
                format!("{IMAGE_INSTRUCTION}\n{}", turn.user_message),
                image.url.clone(),
            ),
            None => ChatMessage::user(turn.user_message),
        });
        messages
    }
}

fn system_prompt(turn: &AiTurn<'_>) -> String {
    let persona = turn
        .bot_config
        .and_then(|config| config.master_prompt.as_deref())
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .unwrap_or(DEFAULT_PERSONA);

    let mut prompt = format!("{persona}\n\n{CATALOG_RULES}");
    if let Some(first_name) = turn.first_name {
        prompt.push_str(&format!(
            "\n\nO cliente se chama {first_name}. Trate-o pelo primeiro nome."
        ));
    }
    if let Some(image) = turn.image {
        prompt.push_str(
            "\n\nO cliente enviou uma imagem nesta mensagem. Descreva o que identificar e \
             relacione com os produtos do catálogo.",
        );
        if !image.hints.is_empty() {
            prompt.push_str(&format!("\nTermos identificados na imagem: {}.", image.hints.join(", ")));
        }
    }
    prompt
}

/// Dedicated system message with the ranked catalog page.
pub fn product_context(page: Option<&CatalogPage>) -> String {
    let Some(page) = page.filter(|page| !page.is_empty()) else {
        return NO_PRODUCTS_CONTEXT.to_owned();
    };

    let lines: Vec<String> = page
        .items
        .iter()
        .map(|(index, ranked)| product_line(*index, &ranked.product))
        .collect();
    let mut context = format!(
        "Produtos do catálogo relacionados à mensagem ({} de {} encontrados):\n{}\n\n\
         Regras de apresentação:\n\
         - Liste TODOS os itens acima, um por linha, mantendo a numeração, o preço e a quantidade.\n\
         - Não comente que a lista foi resumida ou cortada.\n\
         - Use apenas esses dados para responder sobre disponibilidade, preço ou características.",
        page.items.len(),
        page.total,
        lines.join("\n")
    );
    if page.has_more {
        context.push_str("\n- Ao final, pergunte se o cliente quer ver mais opções.");
    }
    context
}

fn transfer_question() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)[^.!?\n]*\b(?:deseja|quer|gostaria|posso|prefere)\b[^.!?\n]*\b(?:transf\w*|encaminh\w*|chamar|chame|falar com)\b[^.!?\n]*\?",
        )
        .expect("transfer question pattern")
    })
}

/// Replaces questions asking permission to hand off with a direct statement.
pub fn strip_transfer_questions(reply: &str) -> String {
    transfer_question().replace_all(reply, DIRECT_STATEMENT).trim().to_owned()
}

/// Prefixes the negotiating banner once.
pub fn with_negotiating_banner(reply: &str) -> String {
    if reply.starts_with(NEGOTIATING_BANNER) {
        reply.to_owned()
    } else {
        format!("{NEGOTIATING_BANNER}{reply}")
    }
}
