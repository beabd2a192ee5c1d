//! Integration tests for the new-lead and conversion automatic sends.

use chrono::Utc;
use leadrelay_core::{
    AutoSendStatus, DefaultSlot, FilterType, LeadEvent, LeadEventHandler, MessageStatus,
    MessagingStorage, RecipientStatus, WebhookUrls,
};
use leadrelay_testing::{LeadBuilder, TemplateBuilder, TestEnv, WHATSAPP_RELAY_PATH};
use serde_json::json;

/// Environment with new-lead sends fully configured.
async fn auto_send_env() -> TestEnv {
    let env = TestEnv::new().await;
    env.enable_auto_send().await;
    env.configure_whatsapp_relay().await;
    env.mock_relay(WHATSAPP_RELAY_PATH, 200, "accepted").await;
    TemplateBuilder::new("Olá {name}")
        .default_for(DefaultSlot::NewLead)
        .insert(env.storage.as_ref())
        .await;
    env
}

#[tokio::test]
async fn new_lead_end_to_end() {
    let env = auto_send_env().await;
    let ana = LeadBuilder::ana().insert(env.storage.as_ref()).await;

    let report = env.triggers().handle_event(LeadEvent::Created { lead: ana.clone() }).await;
    assert_eq!(report.status, AutoSendStatus::Sent, "{}", report.message);

    let messages = env.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].filter_type, FilterType::AutoNewLead);
    assert_eq!(messages[0].filter_value, Some(ana.id.to_string()));
    assert_eq!(messages[0].recipients_count, 1);
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert_eq!(messages[0].content, "Olá {name}");
    let code = report.delivery_code.clone().unwrap();
    assert!(code.starts_with("AUTO-"));
    assert_eq!(env.recipients().await[0].delivery_status, RecipientStatus::Sent);

    env.callback_receiver()
        .handle_body(
            &serde_json::to_vec(&json!({
                "delivery_code": code,
                "lead_identifier": "5582999999999",
                "status": "delivered",
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    let recipient = &env.recipients().await[0];
    assert_eq!(recipient.lead_id, ana.id);
    assert_eq!(recipient.delivery_status, RecipientStatus::Delivered);
    assert!(recipient.delivered_at.is_some());
}

#[tokio::test]
async fn disabled_auto_send_creates_nothing() {
    let env = TestEnv::new().await;
    env.configure_whatsapp_relay().await;
    TemplateBuilder::new("Olá").default_for(DefaultSlot::NewLead).insert(env.storage.as_ref()).await;
    let ana = LeadBuilder::ana().insert(env.storage.as_ref()).await;

    let report = env.triggers().on_lead_created(&ana).await;

    assert_eq!(report.status, AutoSendStatus::Skipped);
    assert!(env.messages().await.is_empty());
    assert!(env.relay_requests().await.is_empty());
}

#[tokio::test]
async fn missing_default_template_creates_nothing() {
    let env = TestEnv::new().await;
    env.enable_auto_send().await;
    env.configure_whatsapp_relay().await;
    TemplateBuilder::new("not default").insert(env.storage.as_ref()).await;
    let ana = LeadBuilder::ana().insert(env.storage.as_ref()).await;

    let report = env.triggers().on_lead_created(&ana).await;

    assert_eq!(report.status, AutoSendStatus::Skipped);
    assert!(report.message.contains("template"), "{}", report.message);
    assert!(env.messages().await.is_empty());
}

#[tokio::test]
async fn unparseable_relay_url_is_treated_as_unconfigured() {
    let env = TestEnv::new().await;
    env.enable_auto_send().await;
    env.settings()
        .set_webhook_urls(&WebhookUrls { whatsapp: Some("not a url".into()), ..WebhookUrls::default() })
        .await
        .unwrap();
    TemplateBuilder::new("Olá").default_for(DefaultSlot::NewLead).insert(env.storage.as_ref()).await;
    let ana = LeadBuilder::ana().insert(env.storage.as_ref()).await;

    let report = env.triggers().on_lead_created(&ana).await;

    assert_eq!(report.status, AutoSendStatus::Skipped);
    assert!(env.messages().await.is_empty());
}

#[tokio::test]
async fn lead_without_whatsapp_is_skipped_on_capture() {
    let env = auto_send_env().await;
    let lead = LeadBuilder::new("Email only").email("e@example.com").insert(env.storage.as_ref()).await;

    let report = env.triggers().on_lead_created(&lead).await;

    assert_eq!(report.status, AutoSendStatus::Skipped);
    assert!(env.messages().await.is_empty());
}

#[tokio::test]
async fn relay_failure_is_reported_not_raised() {
    let env = TestEnv::new().await;
    env.enable_auto_send().await;
    env.configure_whatsapp_relay().await;
    env.mock_relay(WHATSAPP_RELAY_PATH, 500, "boom").await;
    TemplateBuilder::new("Olá").default_for(DefaultSlot::NewLead).insert(env.storage.as_ref()).await;
    let ana = LeadBuilder::ana().insert(env.storage.as_ref()).await;

    let report = env.triggers().on_lead_created(&ana).await;

    assert_eq!(report.status, AutoSendStatus::Failed);
    assert!(report.message_id.is_some());
    assert!(report.message.contains("boom"), "{}", report.message);
    assert_eq!(env.messages().await[0].status, MessageStatus::Failed);
}

/// Environment with conversion sends configured for a "Enrolled" status.
async fn conversion_env() -> (TestEnv, leadrelay_core::StatusId, leadrelay_core::StatusId) {
    let env = TestEnv::new().await;
    let contacted = env.storage.add_status("Contacted", Some("#999999")).await;
    let enrolled = env.storage.add_status("Enrolled", Some("#00aa00")).await;
    env.enable_conversion(enrolled).await;
    env.configure_whatsapp_relay().await;
    env.mock_relay(WHATSAPP_RELAY_PATH, 200, "ok").await;
    TemplateBuilder::new("Bem-vinda!")
        .default_for(DefaultSlot::Conversion)
        .insert(env.storage.as_ref())
        .await;
    (env, contacted, enrolled)
}

#[tokio::test]
async fn conversion_sends_once_on_entering_conversion_status() {
    let (env, contacted, enrolled) = conversion_env().await;
    let lead = LeadBuilder::ana().status(contacted).insert(env.storage.as_ref()).await;

    let (previous, updated) =
        env.storage.update_lead_status(lead.id, Some(enrolled), Utc::now()).await.unwrap();
    let report = env
        .triggers()
        .handle_event(LeadEvent::StatusChanged { lead: updated.clone(), previous_status_id: previous })
        .await;

    assert_eq!(report.status, AutoSendStatus::Sent, "{}", report.message);
    assert!(report.delivery_code.unwrap().starts_with("CONV-"));
    let messages = env.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].filter_type, FilterType::AutomaticConversion);
    assert_eq!(messages[0].filter_value, Some(lead.id.to_string()));

    // Re-saving the same status is not a conversion.
    let (previous, resaved) =
        env.storage.update_lead_status(lead.id, Some(enrolled), Utc::now()).await.unwrap();
    let report = env.triggers().on_status_changed(&resaved, previous).await;
    assert_eq!(report.status, AutoSendStatus::Skipped);
    assert_eq!(env.messages().await.len(), 1);
}

#[tokio::test]
async fn unchanged_status_never_dispatches() {
    let (env, _, enrolled) = conversion_env().await;
    let lead = LeadBuilder::ana().status(enrolled).insert(env.storage.as_ref()).await;

    let report = env.triggers().on_status_changed(&lead, Some(enrolled)).await;

    assert_eq!(report.status, AutoSendStatus::Skipped);
    assert!(env.messages().await.is_empty());
    assert!(env.relay_requests().await.is_empty());
}

#[tokio::test]
async fn transition_to_other_status_is_skipped() {
    let (env, contacted, enrolled) = conversion_env().await;
    let lead = LeadBuilder::ana().status(enrolled).insert(env.storage.as_ref()).await;

    let (previous, updated) =
        env.storage.update_lead_status(lead.id, Some(contacted), Utc::now()).await.unwrap();
    let report = env.triggers().on_status_changed(&updated, previous).await;

    assert_eq!(report.status, AutoSendStatus::Skipped);
    assert!(env.messages().await.is_empty());
}

#[tokio::test]
async fn converting_lead_without_whatsapp_is_skipped() {
    let (env, contacted, enrolled) = conversion_env().await;
    let lead = LeadBuilder::new("Email only")
        .email("e@example.com")
        .status(contacted)
        .insert(env.storage.as_ref())
        .await;

    let (previous, updated) =
        env.storage.update_lead_status(lead.id, Some(enrolled), Utc::now()).await.unwrap();
    let report = env.triggers().on_status_changed(&updated, previous).await;

    assert_eq!(report.status, AutoSendStatus::Skipped);
    assert!(report.message.contains("whatsapp"), "{}", report.message);
    assert!(env.messages().await.is_empty());
}
