//! Catalog matching: keyword extraction, variant search, weighted ranking and
//! page slicing over the ranked list.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use relaydesk_core::domain::product::{format_brl, Product, ProductId};
use relaydesk_core::domain::workspace::WorkspaceId;
use relaydesk_core::text;
use relaydesk_db::repositories::{ProductRepository, RepositoryError};

const MAX_KEYWORDS: usize = 8;
const MIN_KEYWORD_CHARS: usize = 3;
const SCORING_KEYWORD_CHARS: usize = 4;
const DEFAULT_MAX_CANDIDATES: usize = 60;
const PER_VARIANT_LIMIT: u32 = 10;

const NAME_EXACT: u32 = 6;
const NAME_SYNONYM: u32 = 4;
const DESCRIPTION_EXACT: u32 = 4;
const DESCRIPTION_SYNONYM: u32 = 2;

/// Folded forms.
const STOPWORDS: &[&str] = &[
    "tem", "tens", "voce", "voces", "vcs", "que", "qual", "quais", "quanto", "quanta", "custa",
    "custo", "valor", "preco", "para", "pra", "pro", "por", "com", "sem", "uma", "uns", "umas",
    "dos", "das", "nos", "nas", "num", "numa", "esse", "essa", "isso", "este", "esta", "isto",
    "aqui", "ola", "bom", "boa", "dia", "tarde", "noite", "tudo", "bem", "mais", "mim", "meu",
    "minha", "seu", "sua", "ter", "algum", "alguma", "ainda", "sobre", "como", "onde", "quando",
    "sim", "nao", "obrigado", "obrigada", "favor", "quero", "queria", "gostaria", "preciso",
    "procuro", "procurando", "vende", "vendem", "vendi", "produto", "produtos", "opcao", "opcoes",
    "mostrar", "mostra", "ver", "lista", "loja", "disponivel", "estoque", "agora",
    "hoje", "entao", "tipo", "coisa", "algo", "esses", "essas", "outro", "outra", "outros",
    "outras", "manda", "mande",
];

/// Folded synonym groups; every member expands to the rest of its group.
const SYNONYM_GROUPS: &[&[&str]] = &[
    &["remedio", "medicamento"],
    &["comprimido", "capsula", "drageas"],
    &["xarope", "suspensao"],
    &["pomada", "creme", "gel"],
    &["analgesico", "dor"],
    &["antitermico", "febre"],
    &["antibiotico", "infeccao"],
    &["vitamina", "suplemento"],
    &["protetor", "filtro"],
    &["fralda", "fraldas"],
    &["sabonete", "sabao"],
    &["shampoo", "xampu"],
];

const MORE_PHRASES: &[&str] = &[
    "ver mais",
    "mostrar mais",
    "mostra mais",
    "manda mais",
    "mande mais",
    "tem mais",
    "mais opcoes",
    "mais produtos",
    "mais itens",
    "outras opcoes",
    "outros produtos",
    "proximos",
    "proxima pagina",
    "continuar lista",
    "continua",
];

/// Prices in a bot reply mark it as a catalog listing.
pub const PRICE_MARKER: &str = "R$";

fn numbered_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^\s*\*?(\d{1,3})[.)]").expect("numbered line regex"))
}

/// Candidate search keywords, folded, in message order.
pub fn extract_keywords(message: &str, hints: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let source = std::iter::once(message).chain(hints.iter().map(String::as_str));
    source
        .flat_map(|part| {
            text::fold_words(part).split(' ').map(str::to_owned).collect::<Vec<_>>()
        })
        .filter(|token| token.chars().count() >= MIN_KEYWORD_CHARS)
        .filter(|token| !token.chars().all(|ch| ch.is_ascii_digit()))
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .filter(|token| seen.insert(token.clone()))
        .take(MAX_KEYWORDS)
        .collect()
}

fn singular(keyword: &str) -> Option<String> {
    (keyword.ends_with('s') && keyword.chars().count() > 3)
        .then(|| keyword[..keyword.len() - 1].to_owned())
}

fn prefix(keyword: &str, chars: usize) -> Option<String> {
    (keyword.chars().count() > chars).then(|| keyword.chars().take(chars).collect())
}

/// Exact, singular, 5-char prefix, 4-char prefix; duplicates dropped.
pub fn keyword_variants(keyword: &str) -> Vec<String> {
    let mut variants = vec![keyword.to_owned()];
    for variant in [singular(keyword), prefix(keyword, 5), prefix(keyword, 4)].into_iter().flatten()
    {
        if !variants.contains(&variant) {
            variants.push(variant);
        }
    }
    variants
}

pub fn synonyms_for(keyword: &str) -> Vec<&'static str> {
    SYNONYM_GROUPS
        .iter()
        .filter(|group| group.contains(&keyword))
        .flat_map(|group| group.iter().copied().filter(|member| *member != keyword))
        .collect()
}

pub fn wants_more(message: &str) -> bool {
    let words = text::fold_words(message);
    words == "mais" || MORE_PHRASES.iter().any(|phrase| words.contains(phrase))
}

/// Highest leading item number of a catalog listing, if the text is one.
pub fn highest_listed_index(bot_text: &str) -> Option<u32> {
    if !bot_text.contains(PRICE_MARKER) {
        return None;
    }
    numbered_line()
        .captures_iter(bot_text)
        .filter_map(|captures| captures.get(1)?.as_str().parse::<u32>().ok())
        .max()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankedProduct {
    pub product: Product,
    pub score: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogPage {
    /// `(1-based position, product)` pairs.
    pub items: Vec<(u32, RankedProduct)>,
    pub has_more: bool,
    pub total: usize,
}

impl CatalogPage {
    pub fn last_index(&self) -> Option<u32> {
        self.items.last().map(|(index, _)| *index)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pagination {
    Page(CatalogPage),
    /// The resume position is past the end of the ranked list.
    Exhausted { resume_at: u32, total: usize },
}

#[derive(Clone, Debug)]
pub struct CatalogMatcher {
    page_size: usize,
    max_candidates: usize,
}

impl CatalogMatcher {
    pub fn new(page_size: usize) -> Self {
        Self { page_size: page_size.max(1), max_candidates: DEFAULT_MAX_CANDIDATES }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Raw substring matches for every keyword variant, deduplicated by id.
    pub async fn candidates(
        &self,
        products: &dyn ProductRepository,
        workspace_id: WorkspaceId,
        keywords: &[String],
    ) -> Result<Vec<Product>, RepositoryError> {
        let mut seen: HashSet<ProductId> = HashSet::new();
        let mut found = Vec::new();

        'keywords: for keyword in keywords {
            for variant in keyword_variants(keyword) {
                for product in products.search(workspace_id, &variant, PER_VARIANT_LIMIT).await? {
                    if seen.insert(product.id) {
                        found.push(product);
                    }
                    if found.len() >= self.max_candidates {
                        break 'keywords;
                    }
                }
            }
        }
        Ok(found)
    }

    pub fn rank(&self, keywords: &[String], candidates: Vec<Product>) -> Vec<RankedProduct> {
        let long: Vec<&String> =
            keywords.iter().filter(|k| k.chars().count() >= SCORING_KEYWORD_CHARS).collect();
        let scoring: Vec<&String> =
            if long.is_empty() { keywords.iter().collect() } else { long };

        let mut ranked: Vec<RankedProduct> = candidates
            .iter()
            .filter_map(|product| {
                score_product(product, &scoring)
                    .map(|score| RankedProduct { product: product.clone(), score })
            })
            .collect();

        if ranked.is_empty() {
            ranked =
                candidates.into_iter().map(|product| RankedProduct { product, score: 0 }).collect();
        }
        ranked.sort_by(compare_ranked);
        ranked
    }

    /// Slices one page. `resume_after` is the last position already shown.
    pub fn paginate(&self, ranked: &[RankedProduct], resume_after: Option<u32>) -> Pagination {
        let start = resume_after.unwrap_or(0) as usize;
        if resume_after.is_some() && start >= ranked.len() {
            return Pagination::Exhausted { resume_at: start as u32 + 1, total: ranked.len() };
        }

        let items: Vec<(u32, RankedProduct)> = ranked
            .iter()
            .enumerate()
            .skip(start)
            .take(self.page_size)
            .map(|(offset, item)| (offset as u32 + 1, item.clone()))
            .collect();
        let shown_until = start + items.len();
        Pagination::Page(CatalogPage {
            items,
            has_more: shown_until < ranked.len(),
            total: ranked.len(),
        })
    }
}

fn compare_ranked(left: &RankedProduct, right: &RankedProduct) -> Ordering {
    right
        .score
        .cmp(&left.score)
        .then(left.product.price_cents.cmp(&right.product.price_cents))
        .then_with(|| left.product.name.cmp(&right.product.name))
}

fn score_product(product: &Product, keywords: &[&String]) -> Option<u32> {
    let name = text::fold_words(&product.name);
    let description = product.description.as_deref().map(text::fold_words).unwrap_or_default();

    let mut score = 0;
    let mut matched = 0;
    for keyword in keywords {
        let exact: Vec<String> =
            std::iter::once(keyword.to_string()).chain(singular(keyword)).collect();
        let synonyms = synonyms_for(keyword);
        let exact_in = |words: &str| exact.iter().any(|term| text::contains_word(words, term));
        let synonym_in = |words: &str| synonyms.iter().any(|term| text::contains_word(words, term));

        let before = score;
        if exact_in(&name) {
            score += NAME_EXACT;
        } else if synonym_in(&name) {
            score += NAME_SYNONYM;
        }
        if exact_in(&description) {
            score += DESCRIPTION_EXACT;
        } else if synonym_in(&description) {
            score += DESCRIPTION_SYNONYM;
        }
        if score > before {
            matched += 1;
        }
    }
    (matched > 0).then_some(score)
}

/// One context line per listed product, numbered by ranked position.
pub fn product_line(index: u32, product: &Product) -> String {
    format!(
        "{index}. SKU {} — {} — preço {} — quantidade {} — descrição: {}",
        product.sku,
        product.name,
        format_brl(product.price_cents),
        product.quantity,
        product.description.as_deref().unwrap_or("sem descrição"),
    )
}
