//! Per-call system instruction composer.
//!
//! One fixed policy block plus a context block derived from the
//! identification result. The output is opaque to the LLM session layer.

use crate::backend::IdentificationContext;

/// Conversation policy, independent of who is calling.
const POLICY: &str = "\
あなたはECショップのカスタマーサポート担当です。電話での応対を行います。

応対のルール:
- 丁寧語で、短い文で話してください。一度に長く話しすぎないでください。
- 数字は一桁ずつ読み上げてください。例: 注文番号「R-42」は「アール、の、よん、に」。
- AIが対応できる用件: 注文状況・配送状況の確認、返品の受付、ご案内メールの送信。
- 担当者に引き継ぐ用件: お支払いに関する問題、クレーム、高額商品の返品、その他判断に迷う場合。引き継ぐときは transfer_to_human を使ってください。
- 通話の最初は挨拶から始め、最後は「お電話ありがとうございました」で締めてください。
- わからないことを推測で答えないでください。
";

/// Compose the full instruction for one call.
pub fn compose(ctx: &IdentificationContext, shop_name: &str) -> String {
    let mut prompt = format!("店舗名: {shop_name}\n\n{POLICY}\n");

    if ctx.found {
        let name = ctx.customer_name.as_deref().unwrap_or("お客様");
        prompt.push_str(&format!(
            "\n現在の発信者: {name}様(電話番号から特定済み)。\n\
             最初の挨拶は「{}」としてください。\n\
             もしご本人でないと言われたら、お詫びしてお名前をお伺いしてください。\n",
            ctx.greeting_hint
        ));

        if let Some(latest) = ctx.orders.first() {
            prompt.push_str(&format!(
                "\n直近のご注文(聞かれるまでこちらから話さないこと):\n\
                 - 注文番号: {}\n- 注文日: {}\n- 商品: {}\n- 状況: {}\n",
                latest.order_id,
                latest.order_date,
                latest.item_names.join("、"),
                latest.status_message,
            ));
            if let Some(tracking) = latest.tracking_number.as_deref() {
                prompt.push_str(&format!("- お問い合わせ番号: {tracking}\n"));
            }
        }
    } else {
        prompt.push_str(
            "\n発信者は特定できていません。最初にお名前をお伺いし、\
             ご注文に関する用件ではご注文番号をお伺いしてください。\n",
        );
        if ctx.error {
            // Same caller-facing script; only the logs differ.
            prompt.push_str("(注: 顧客検索が利用できなかったための未特定です。)\n");
        }
    }

    prompt
}
