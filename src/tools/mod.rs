//! Business tools exposed to the LLM: schema declarations and dispatch.
//!
//! Tool names and argument shapes are the external ABI the model sees;
//! renaming one silently breaks live calls, so the schemas live next to
//! the dispatch table.

pub mod email;

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::backend::{
    assess, normalize_phone, BackendError, IdentificationContext, ItemCondition, Order,
    OrderClient, ReturnKind, ReturnReason, ReturnRequest,
};
use crate::llm::ToolDef;
use email::{EmailAdapter, EmailParams, EmailTemplate};

/// How urgently a handoff should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffPriority {
    #[default]
    Normal,
    High,
    Urgent,
}

/// Result of one tool execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Plain sentence for the assistant to voice.
    Text(String),

    /// Structured refusal/acceptance, serialized for the model.
    Structured {
        success: bool,
        message: String,
        requires_handoff: bool,
    },

    /// The caller asked for a human; the mediator branches on this.
    Handoff {
        reason: String,
        summary: Option<String>,
        priority: HandoffPriority,
    },
}

/// Per-call context available to every tool.
#[derive(Debug, Clone)]
pub struct ToolCallContext {
    pub caller_phone: String,
    pub ident: IdentificationContext,
}

/// Spoken when a tool fails for reasons the caller cannot fix.
const SYSTEM_ERROR_MESSAGE: &str =
    "申し訳ございません。システムエラーが発生いたしました。担当者におつなぎすることもできますが、いかがいたしましょうか。";

/// Spoken when the order backend is temporarily unreachable.
const BACKEND_DOWN_MESSAGE: &str =
    "申し訳ございません。ただいま注文情報の確認ができません。少し時間をおいておかけ直しいただくか、担当者におつなぎいたします。";

/// Tool schemas declared to the LLM at session setup.
pub fn tool_schemas() -> Vec<ToolDef> {
    vec![
        ToolDef::function(
            "check_order_status",
            "注文状況を確認します。引数を省略すると発信者の電話番号で検索します。",
            json!({
                "type": "object",
                "properties": {
                    "phone_number": {
                        "type": "string",
                        "description": "お客様の電話番号"
                    },
                    "order_id": {
                        "type": "string",
                        "description": "注文番号"
                    }
                },
                "required": []
            }),
        ),
        ToolDef::function(
            "register_return",
            "返品を受け付けます。受付できない場合は担当者への引き継ぎが必要かどうかを返します。",
            json!({
                "type": "object",
                "properties": {
                    "order_id": { "type": "string", "description": "注文番号" },
                    "reason": {
                        "type": "string",
                        "enum": ["defective", "damaged", "wrong_item", "size_issue", "image_different", "other"],
                        "description": "返品理由"
                    },
                    "condition": {
                        "type": "string",
                        "enum": ["unopened", "opened"],
                        "description": "商品の開封状態"
                    },
                    "request": {
                        "type": "string",
                        "enum": ["refund", "exchange"],
                        "description": "返金か交換か"
                    },
                    "description": { "type": "string", "description": "補足説明" }
                },
                "required": ["order_id", "reason", "condition", "request"]
            }),
        ),
        ToolDef::function(
            "send_email",
            "お客様にメールを送信します。テンプレートを指定してください。",
            json!({
                "type": "object",
                "properties": {
                    "template": {
                        "type": "string",
                        "enum": ["tracking", "return_form", "callback"],
                        "description": "送信するメールの種類"
                    }
                },
                "required": ["template"]
            }),
        ),
        ToolDef::function(
            "transfer_to_human",
            "担当者に電話を引き継ぎます。AIで対応できないご用件のときに使います。",
            json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string", "description": "引き継ぎの理由" },
                    "summary": { "type": "string", "description": "これまでの会話の要約" },
                    "priority": {
                        "type": "string",
                        "enum": ["normal", "high", "urgent"],
                        "description": "緊急度"
                    }
                },
                "required": ["reason"]
            }),
        ),
    ]
}

/// Routes LLM tool calls to the backend and side-effect adapters.
pub struct ToolDispatcher {
    orders: Arc<OrderClient>,
    email: Arc<dyn EmailAdapter>,
    shop_name: String,
}

impl ToolDispatcher {
    pub fn new(orders: Arc<OrderClient>, email: Arc<dyn EmailAdapter>, shop_name: String) -> Self {
        Self {
            orders,
            email,
            shop_name,
        }
    }

    /// Execute one tool call. Never fails: every error collapses into a
    /// sentence the assistant can voice.
    pub async fn execute(&self, name: &str, args_json: &str, ctx: &ToolCallContext) -> ToolOutcome {
        // Malformed arguments degrade to an empty object; most tools then
        // answer with a prompt for the missing information.
        let args: Value = serde_json::from_str(args_json).unwrap_or_else(|e| {
            warn!(tool = name, error = %e, "malformed tool arguments");
            json!({})
        });
        info!(tool = name, "executing tool call");

        match name {
            "check_order_status" => self.check_order_status(&args, ctx).await,
            "register_return" => self.register_return(&args).await,
            "send_email" => self.send_email(&args, ctx).await,
            "transfer_to_human" => Self::transfer_to_human(&args),
            _ => {
                warn!(tool = name, "unknown tool requested");
                ToolOutcome::Text(format!("unknown tool: {name}"))
            }
        }
    }

    async fn check_order_status(&self, args: &Value, ctx: &ToolCallContext) -> ToolOutcome {
        let order_id = str_arg(args, "order_id");
        let phone = str_arg(args, "phone_number")
            .or_else(|| {
                if order_id.is_none() {
                    Some(ctx.caller_phone.clone())
                } else {
                    None
                }
            })
            .map(|p| normalize_phone(&p));

        let result = self
            .orders
            .search_orders(phone.as_deref(), order_id.as_deref(), 5)
            .await;
        let orders = match result {
            Ok(orders) => orders,
            Err(BackendError::InvalidQuery(_)) => {
                return ToolOutcome::Text(
                    "恐れ入りますが、お電話番号かご注文番号をお伺いできますでしょうか。".to_string(),
                )
            }
            Err(e) => return backend_failure("check_order_status", e),
        };

        match orders.len() {
            0 => ToolOutcome::Text(
                "ご注文が見つかりませんでした。恐れ入りますが、ご注文番号をお伺いできますでしょうか。"
                    .to_string(),
            ),
            1 => {
                let order = &orders[0];
                ToolOutcome::Text(format!(
                    "ご注文番号{}、{}のご注文ですね。{}",
                    order.order_id,
                    order.order_date,
                    crate::backend::status_message(order)
                ))
            }
            n => {
                let mut text = format!("直近のご注文が{n}件ございます。");
                for order in &orders {
                    let item = order
                        .items
                        .first()
                        .map(|i| i.name.as_str())
                        .unwrap_or("商品");
                    text.push_str(&format!("{}のご注文、{}など。", order.order_date, item));
                }
                text.push_str("どちらのご注文でしょうか。");
                ToolOutcome::Text(text)
            }
        }
    }

    async fn register_return(&self, args: &Value) -> ToolOutcome {
        let Some(order_id) = str_arg(args, "order_id") else {
            return ToolOutcome::Text(
                "返品のお手続きには、ご注文番号が必要です。お伺いできますでしょうか。".to_string(),
            );
        };
        let (Some(reason), Some(condition), Some(kind)) = (
            enum_arg::<ReturnReason>(args, "reason"),
            enum_arg::<ItemCondition>(args, "condition"),
            enum_arg::<ReturnKind>(args, "request"),
        ) else {
            return ToolOutcome::Text(
                "返品の理由と、商品の開封状態、返金か交換かのご希望をお伺いできますでしょうか。"
                    .to_string(),
            );
        };

        let order = match self.orders.get_order(&order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                return ToolOutcome::Text(
                    "ご注文が見つかりませんでした。ご注文番号をもう一度お伺いできますでしょうか。"
                        .to_string(),
                )
            }
            Err(e) => return backend_failure("register_return", e),
        };

        let eligibility = assess(&order, reason, condition, Utc::now().date_naive());
        if !eligibility.eligible {
            return ToolOutcome::Structured {
                success: false,
                message: eligibility.message,
                requires_handoff: eligibility.requires_handoff,
            };
        }

        let request = ReturnRequest {
            order_id,
            reason,
            condition,
            kind,
            description: str_arg(args, "description"),
        };
        match self.orders.register_return(&request).await {
            Ok(receipt) => {
                ToolOutcome::Text(format!("{}{}", eligibility.message, receipt.message))
            }
            Err(e) => backend_failure("register_return", e),
        }
    }

    async fn send_email(&self, args: &Value, ctx: &ToolCallContext) -> ToolOutcome {
        let Some(template) = str_arg(args, "template").and_then(|t| EmailTemplate::from_name(&t))
        else {
            return ToolOutcome::Text(
                "送信できるメールは、配送状況のご案内、返品手続きのご案内、折り返しのご連絡の三種類です。"
                    .to_string(),
            );
        };

        // Summaries in the identification context do not carry the email
        // address; resolve it through an order lookup.
        let order = match self.latest_order(ctx).await {
            Ok(order) => order,
            Err(e) => return backend_failure("send_email", e),
        };
        let Some(order) = order else {
            return ToolOutcome::Text(
                "ご注文が確認できなかったため、メールをお送りできません。ご注文番号をお伺いできますでしょうか。"
                    .to_string(),
            );
        };
        let Some(to) = order.customer_email.clone() else {
            return ToolOutcome::Text(
                "お客様のメールアドレスが登録されていません。口頭でメールアドレスをお伺いしてください。"
                    .to_string(),
            );
        };

        let params = EmailParams {
            customer_name: order.customer_name.clone(),
            order_id: order.order_id.clone(),
            carrier: order.carrier.clone(),
            tracking_number: order.tracking_number.clone(),
            shop_name: self.shop_name.clone(),
        };
        let (subject, body) = template.render(&params);
        match self.email.send(&to, &subject, &body).await {
            Ok(()) => ToolOutcome::Text("メールをお送りいたしました。ご確認ください。".to_string()),
            Err(e) => {
                error!(error = %e, "email send failed");
                ToolOutcome::Text(SYSTEM_ERROR_MESSAGE.to_string())
            }
        }
    }

    fn transfer_to_human(args: &Value) -> ToolOutcome {
        ToolOutcome::Handoff {
            reason: str_arg(args, "reason").unwrap_or_else(|| "未指定".to_string()),
            summary: str_arg(args, "summary"),
            priority: enum_arg::<HandoffPriority>(args, "priority").unwrap_or_default(),
        }
    }

    /// The caller's most recent order, preferring the identification
    /// context over a fresh phone search.
    async fn latest_order(&self, ctx: &ToolCallContext) -> Result<Option<Order>, BackendError> {
        if let Some(summary) = ctx.ident.orders.first() {
            return self.orders.get_order(&summary.order_id).await;
        }
        let phone = normalize_phone(&ctx.caller_phone);
        let mut orders = self.orders.search_orders(Some(&phone), None, 1).await?;
        Ok(if orders.is_empty() {
            None
        } else {
            Some(orders.remove(0))
        })
    }
}

fn backend_failure(tool: &str, e: BackendError) -> ToolOutcome {
    error!(tool, error = %e, "tool backend call failed");
    match e {
        BackendError::Transient(_) | BackendError::Auth(_) => {
            ToolOutcome::Text(BACKEND_DOWN_MESSAGE.to_string())
        }
        _ => ToolOutcome::Text(SYSTEM_ERROR_MESSAGE.to_string()),
    }
}

fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn enum_arg<T: serde::de::DeserializeOwned>(args: &Value, key: &str) -> Option<T> {
    args.get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}
