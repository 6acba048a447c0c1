//! IXC Soft webservice client backing the billing flow.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::NaiveDate;
use relaydesk_agent::{BillingError, BillingGateway};
use relaydesk_core::domain::billing::{BillingCustomer, Statement};
use relaydesk_core::{BillingCredentials, Invoice, TaxDocument, UnblockOutcome};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const LIST_HEADER: &str = "ixcsoft";
const LIST_HEADER_VALUE: &str = "listar";
pub const ALREADY_RELEASED_MESSAGE: &str =
    "Cliente já está com acesso liberado! Não há necessidade de desbloqueio.";
pub const UNBLOCKED_MESSAGE: &str = "Desbloqueio de confiança realizado com sucesso!";
const NO_CONTRACT_MESSAGE: &str = "Nenhum contrato encontrado para este cliente.";

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    total: Value,
    #[serde(default)]
    registros: Vec<Value>,
}

impl ListResponse {
    fn total(&self) -> u64 {
        match &self.total {
            Value::String(raw) => raw.trim().parse().unwrap_or(0),
            Value::Number(number) => number.as_u64().unwrap_or(0),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IxcGateway {
    client: reqwest::Client,
}

impl IxcGateway {
    pub fn new(timeout: Duration) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| BillingError::Http(error.to_string()))?;
        Ok(Self { client })
    }

    async fn list(
        &self,
        credentials: &BillingCredentials,
        resource: &str,
        body: Value,
    ) -> Result<ListResponse, BillingError> {
        let response = self
            .post(credentials, resource, &body, true)
            .await?;
        let raw = response.bytes().await.map_err(map_http)?;
        serde_json::from_slice(&raw).map_err(|error| BillingError::Decode(error.to_string()))
    }

    async fn post(
        &self,
        credentials: &BillingCredentials,
        resource: &str,
        body: &Value,
        listing: bool,
    ) -> Result<reqwest::Response, BillingError> {
        let url = format!("{}/{resource}", base_url(&credentials.api_url));
        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, basic_auth(credentials.api_token.expose_secret()))
            .json(body);
        if listing {
            request = request.header(LIST_HEADER, LIST_HEADER_VALUE);
        }
        let response = request.send().await.map_err(map_http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "billing.request.rejected",
                resource,
                status = status.as_u16(),
                "billing system rejected request"
            );
            return Err(BillingError::Rejected { status: status.as_u16(), body });
        }
        debug!(event_name = "billing.request.completed", resource, "billing call succeeded");
        Ok(response)
    }

    async fn first_customer(
        &self,
        credentials: &BillingCredentials,
        qtype: &str,
        query: &str,
    ) -> Result<Option<BillingCustomer>, BillingError> {
        let listing = self
            .list(
                credentials,
                "cliente",
                json!({"qtype": qtype, "query": query, "oper": "=", "page": 1, "rp": 1}),
            )
            .await?;
        if listing.total() == 0 {
            return Ok(None);
        }
        Ok(listing.registros.first().map(customer_from))
    }
}

/// Adds the scheme and the `/webservice/v1` suffix when the stored URL lacks them.
pub fn base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    };
    if with_scheme.contains("/webservice/") {
        with_scheme
    } else {
        format!("{with_scheme}/webservice/v1")
    }
}

/// Tokens without a user part belong to user `1`.
pub fn basic_auth(token: &str) -> String {
    let token = token.trim();
    let credentials = if token.contains(':') { token.to_owned() } else { format!("1:{token}") };
    format!("Basic {}", STANDARD.encode(credentials))
}

fn map_http(error: reqwest::Error) -> BillingError {
    if error.is_timeout() {
        BillingError::Timeout
    } else {
        BillingError::Http(error.to_string())
    }
}

fn text_field(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_owned()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn customer_from(record: &Value) -> BillingCustomer {
    BillingCustomer {
        id: text_field(record, "id").unwrap_or_default(),
        name: text_field(record, "razao").unwrap_or_default(),
        document: text_field(record, "cnpj_cpf"),
    }
}

/// `"1234.5"` or `"1234,50"` to cents.
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
    let normalized = raw.trim().replace(',', ".");
    let (whole, fraction) = normalized.split_once('.').unwrap_or((normalized.as_str(), ""));
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut fraction: String = fraction.chars().take(2).collect();
    while fraction.len() < 2 {
        fraction.push('0');
    }
    let fraction: i64 = fraction.parse().ok()?;
    Some(whole * 100 + fraction)
}

fn invoice_from(record: &Value) -> Option<Invoice> {
    let id = text_field(record, "id")?;
    let due_date = text_field(record, "data_vencimento")
        .and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok())?;
    let amount_cents = text_field(record, "valor").and_then(|raw| parse_amount_cents(&raw))?;
    Some(Invoice {
        id,
        customer_id: text_field(record, "id_cliente").unwrap_or_default(),
        amount_cents,
        due_date,
        document_number: text_field(record, "documento"),
        payment_reference: text_field(record, "linha_digitavel"),
    })
}

fn is_blocked(contract: &Value) -> bool {
    text_field(contract, "bloqueio_automatico").as_deref() == Some("S")
        || text_field(contract, "status_internet").as_deref() == Some("D")
}

#[async_trait]
impl BillingGateway for IxcGateway {
    async fn find_customer_by_document(
        &self,
        credentials: &BillingCredentials,
        document: &TaxDocument,
    ) -> Result<Option<BillingCustomer>, BillingError> {
        let mut variants = vec![document.digits().to_owned(), document.formatted()];
        variants.dedup();
        for variant in variants {
            if let Some(customer) =
                self.first_customer(credentials, "cliente.cnpj_cpf", &variant).await?
            {
                return Ok(Some(customer));
            }
        }
        Ok(None)
    }

    async fn find_customer_by_phone(
        &self,
        credentials: &BillingCredentials,
        phone: &str,
    ) -> Result<Option<BillingCustomer>, BillingError> {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Ok(None);
        }
        self.first_customer(credentials, "cliente.telefone_celular", &digits).await
    }

    async fn open_invoices(
        &self,
        credentials: &BillingCredentials,
        customer_id: &str,
    ) -> Result<Vec<Invoice>, BillingError> {
        let listing = self
            .list(
                credentials,
                "fn_areceber",
                json!({
                    "qtype": "fn_areceber.id_cliente",
                    "query": customer_id,
                    "oper": "=",
                    "page": 1,
                    "rp": 1000,
                    "sortname": "fn_areceber.data_vencimento",
                    "sortorder": "asc",
                }),
            )
            .await?;
        let invoices: Vec<Invoice> = listing
            .registros
            .iter()
            .filter(|record| text_field(record, "status").as_deref() == Some("A"))
            .filter_map(invoice_from)
            .collect();
        info!(
            event_name = "billing.invoices.listed",
            customer_id,
            open = invoices.len(),
            "open invoices fetched"
        );
        Ok(invoices)
    }

    async fn statement(
        &self,
        credentials: &BillingCredentials,
        invoice_id: &str,
    ) -> Result<Statement, BillingError> {
        let body = json!({
            "boletos": invoice_id,
            "juro": "S",
            "multa": "S",
            "atualiza_boleto": "S",
            "tipo_boleto": "arquivo",
            "base64": "N",
            "layout_impressao": "",
        });
        let response = self.post(credentials, "get_boleto", &body, true).await?;
        let raw = response.bytes().await.map_err(map_http)?;
        let bytes = if raw.starts_with(b"%PDF") {
            raw.to_vec()
        } else {
            let payload: Value = serde_json::from_slice(&raw)
                .map_err(|_| BillingError::Decode("unknown statement format".to_owned()))?;
            let encoded = payload
                .get("base64")
                .and_then(Value::as_str)
                .ok_or_else(|| BillingError::Decode("statement payload has no base64".to_owned()))?;
            STANDARD
                .decode(encoded.trim())
                .map_err(|error| BillingError::Decode(error.to_string()))?
        };
        Ok(Statement {
            invoice_id: invoice_id.to_owned(),
            file_name: format!("boleto_{invoice_id}.pdf"),
            mime_type: "application/pdf".to_owned(),
            bytes,
        })
    }

    async fn unblock(
        &self,
        credentials: &BillingCredentials,
        customer_id: &str,
    ) -> Result<UnblockOutcome, BillingError> {
        let contracts = self
            .list(
                credentials,
                "cliente_contrato",
                json!({
                    "qtype": "cliente_contrato.id_cliente",
                    "query": customer_id,
                    "oper": "=",
                    "page": 1,
                    "rp": 10,
                    "sortname": "cliente_contrato.id",
                    "sortorder": "desc",
                }),
            )
            .await?;
        let contract = contracts
            .registros
            .iter()
            .find(|contract| text_field(contract, "status").as_deref() == Some("A"))
            .or_else(|| contracts.registros.first());
        let Some(contract) = contract else {
            return Ok(UnblockOutcome::Failed { message: NO_CONTRACT_MESSAGE.to_owned() });
        };
        if !is_blocked(contract) {
            return Ok(UnblockOutcome::AlreadyReleased {
                message: ALREADY_RELEASED_MESSAGE.to_owned(),
            });
        }

        let contract_id = text_field(contract, "id").unwrap_or_default();
        let id = contract_id
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(contract_id.clone()));
        let response = self
            .post(credentials, "desbloqueio_confianca", &json!({"id": id}), false)
            .await?;
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        let message = payload.get("message").and_then(Value::as_str).map(str::to_owned);
        info!(
            event_name = "billing.unblock.executed",
            customer_id,
            contract_id = %contract_id,
            "trust unblock requested"
        );
        if payload.get("type").and_then(Value::as_str) == Some("error") {
            return Ok(UnblockOutcome::Failed {
                message: message.unwrap_or_else(|| "Erro ao executar desbloqueio".to_owned()),
            });
        }
        Ok(UnblockOutcome::Unblocked { message: message.unwrap_or_else(|| UNBLOCKED_MESSAGE.to_owned()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use chrono::NaiveDate;
    use relaydesk_agent::BillingGateway;
    use relaydesk_core::{BillingCredentials, TaxDocument, UnblockOutcome};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use super::{base_url, basic_auth, parse_amount_cents, IxcGateway, ALREADY_RELEASED_MESSAGE};

    fn credentials(server: &MockServer) -> BillingCredentials {
        BillingCredentials {
            api_url: format!("{}/webservice/v1", server.uri()),
            api_token: "secret".to_owned().into(),
        }
    }

    fn gateway() -> IxcGateway {
        IxcGateway::new(Duration::from_secs(5)).expect("gateway")
    }

    #[test]
    fn base_url_gains_scheme_and_webservice_suffix() {
        assert_eq!(base_url("erp.example.com"), "https://erp.example.com/webservice/v1");
        assert_eq!(
            base_url("http://erp.example.com/webservice/v1/"),
            "http://erp.example.com/webservice/v1"
        );
        assert_eq!(basic_auth("abc"), format!("Basic {}", STANDARD.encode("1:abc")));
        assert_eq!(basic_auth("7:abc"), format!("Basic {}", STANDARD.encode("7:abc")));
    }

    #[test]
    fn amounts_parse_to_cents() {
        assert_eq!(parse_amount_cents("89.9"), Some(8990));
        assert_eq!(parse_amount_cents("1250,00"), Some(125000));
        assert_eq!(parse_amount_cents("100"), Some(10000));
        assert_eq!(parse_amount_cents("abc"), None);
    }

    #[tokio::test]
    async fn customer_lookup_falls_back_to_formatted_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webservice/v1/cliente"))
            .and(header("ixcsoft", "listar"))
            .and(body_partial_json(json!({"query": "08484431606"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": "0"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webservice/v1/cliente"))
            .and(body_partial_json(json!({"qtype": "cliente.cnpj_cpf", "query": "084.844.316-06"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": "1",
                "registros": [{"id": "42", "razao": "Maria Souza", "cnpj_cpf": "084.844.316-06"}]
            })))
            .mount(&server)
            .await;

        let document = TaxDocument::from_digits("08484431606").expect("cpf");
        let customer = gateway()
            .find_customer_by_document(&credentials(&server), &document)
            .await
            .expect("lookup")
            .expect("customer");

        assert_eq!(customer.id, "42");
        assert_eq!(customer.name, "Maria Souza");
    }

    #[tokio::test]
    async fn open_invoices_keep_only_open_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webservice/v1/fn_areceber"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": "2",
                "registros": [
                    {"id": "9", "id_cliente": "42", "valor": "99.90", "data_vencimento": "2026-09-10",
                     "status": "A", "documento": "NF-9", "linha_digitavel": "2379..."},
                    {"id": "8", "id_cliente": "42", "valor": "99.90", "data_vencimento": "2026-08-10",
                     "status": "R"}
                ]
            })))
            .mount(&server)
            .await;

        let invoices =
            gateway().open_invoices(&credentials(&server), "42").await.expect("invoices");

        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].id, "9");
        assert_eq!(invoices[0].amount_cents, 9990);
        assert_eq!(invoices[0].due_date, NaiveDate::from_ymd_opt(2026, 9, 10).expect("date"));
    }

    #[tokio::test]
    async fn statement_accepts_binary_and_base64_payloads() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webservice/v1/get_boleto"))
            .and(body_partial_json(json!({"boletos": "9", "tipo_boleto": "arquivo"})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 body".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webservice/v1/get_boleto"))
            .and(body_partial_json(json!({"boletos": "10"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"base64": STANDARD.encode(b"%PDF-1.7 other")})),
            )
            .mount(&server)
            .await;

        let binary = gateway().statement(&credentials(&server), "9").await.expect("binary");
        let encoded = gateway().statement(&credentials(&server), "10").await.expect("encoded");

        assert_eq!(binary.bytes, b"%PDF-1.4 body");
        assert_eq!(binary.file_name, "boleto_9.pdf");
        assert_eq!(encoded.bytes, b"%PDF-1.7 other");
    }

    #[tokio::test]
    async fn unblock_skips_contracts_that_are_not_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webservice/v1/cliente_contrato"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": "1",
                "registros": [{"id": "5", "status": "A", "bloqueio_automatico": "N", "status_internet": "A"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webservice/v1/desbloqueio_confianca"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = gateway().unblock(&credentials(&server), "42").await.expect("unblock");

        assert_eq!(
            outcome,
            UnblockOutcome::AlreadyReleased { message: ALREADY_RELEASED_MESSAGE.to_owned() }
        );
    }

    #[tokio::test]
    async fn unblock_posts_contract_id_without_list_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webservice/v1/cliente_contrato"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": "2",
                "registros": [
                    {"id": "7", "status": "I"},
                    {"id": "5", "status": "A", "status_internet": "D"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webservice/v1/desbloqueio_confianca"))
            .and(body_partial_json(json!({"id": 5})))
            .respond_with(|request: &Request| {
                if request.headers.contains_key("ixcsoft") {
                    ResponseTemplate::new(400)
                } else {
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"type": "success", "message": "Liberado"}))
                }
            })
            .mount(&server)
            .await;

        let outcome = gateway().unblock(&credentials(&server), "42").await.expect("unblock");

        assert_eq!(outcome, UnblockOutcome::Unblocked { message: "Liberado".to_owned() });
    }

    #[tokio::test]
    async fn unblock_reports_api_errors_as_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webservice/v1/cliente_contrato"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": "1",
                "registros": [{"id": "5", "status": "A", "bloqueio_automatico": "S"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webservice/v1/desbloqueio_confianca"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"type": "error", "message": "Limite atingido"})),
            )
            .mount(&server)
            .await;

        let outcome = gateway().unblock(&credentials(&server), "42").await.expect("unblock");

        assert_eq!(outcome, UnblockOutcome::Failed { message: "Limite atingido".to_owned() });
    }
}
