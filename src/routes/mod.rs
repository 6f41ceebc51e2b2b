pub mod admin;
pub mod api_accounts;
pub mod auth;
pub mod contracts;
pub mod gateways;
pub mod health;
pub mod invoices;
pub mod me;
pub mod notifications;
pub mod oauth;
pub mod pages;
pub mod tenants;
pub mod tickets;
pub mod users;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::app::AppState;
use crate::config::Settings;

/// Room for multipart boundaries and part headers around the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the API router with all routes
pub fn api_router(settings: &Settings) -> Router<Arc<AppState>> {
    Router::new()
        .merge(public_routes())
        .merge(account_routes())
        .merge(customer_routes())
        .merge(admin_routes())
        .merge(machine_routes())
        .merge(upload_routes(settings.attachment_max_bytes + MULTIPART_OVERHEAD))
}

fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/auth/login", post(auth::login))
        .route("/auth/register", post(auth::register))
        .route("/oauth/token", post(oauth::issue_token))
        .route("/pages/:slug", get(pages::get_public_page))
}

fn account_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me", get(me::get_me).put(me::update_me))
        .route("/me/password", put(me::change_password))
}

fn customer_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/customer/dashboard", get(notifications::customer_dashboard))
        // Invoices
        .route("/customer/invoices", get(invoices::customer_list_invoices))
        .route("/customer/invoices/:id", get(invoices::customer_get_invoice))
        // Contracts
        .route("/customer/contracts", get(contracts::customer_list_contracts))
        .route("/customer/contracts/:id", get(contracts::customer_get_contract))
        .route(
            "/customer/contracts/:id/cancellation-preview",
            get(contracts::customer_cancellation_preview),
        )
        .route(
            "/customer/contracts/:id/cancel",
            post(contracts::customer_cancel_contract),
        )
        // Tickets
        .route(
            "/customer/tickets",
            get(tickets::customer_list_tickets).post(tickets::customer_create_ticket),
        )
        .route("/customer/tickets/:id", get(tickets::customer_get_ticket))
        .route("/customer/tickets/:id/messages", post(tickets::customer_reply))
        .route("/customer/tickets/:id/close", post(tickets::customer_close_ticket))
        .route(
            "/customer/tickets/:id/attachments/:attachment_id",
            get(tickets::customer_download_attachment),
        )
        // Payment gateways
        .route("/customer/gateways", get(gateways::customer_list_gateways))
        // Machine credentials
        .route("/customer/api/accounts", get(api_accounts::customer_list_accounts))
        .route(
            "/customer/oauth/clients",
            get(oauth::customer_list_clients).post(oauth::customer_create_client),
        )
        .route(
            "/customer/oauth/clients/:id",
            put(oauth::customer_update_client).delete(oauth::customer_revoke_client),
        )
        .route(
            "/customer/oauth/clients/:id/secret",
            post(oauth::customer_regenerate_secret),
        )
        // Notifications
        .route("/customer/notifications", get(notifications::list_notifications))
        .route(
            "/customer/notifications/read-all",
            post(notifications::mark_all_read),
        )
        .route("/customer/notifications/:id/read", post(notifications::mark_read))
}

fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/stats", get(admin::get_stats))
        .route("/admin/audit-log", get(admin::list_audit_log))
        // Users
        .route(
            "/admin/users",
            get(users::admin_list_users).post(users::admin_create_user),
        )
        .route(
            "/admin/users/:id",
            get(users::admin_get_user)
                .put(users::admin_update_user)
                .delete(users::admin_delete_user),
        )
        // API accounts
        .route(
            "/admin/api/accounts",
            get(api_accounts::admin_list_accounts).post(api_accounts::admin_create_account),
        )
        .route(
            "/admin/api/accounts/:id",
            get(api_accounts::admin_get_account)
                .put(api_accounts::admin_update_account)
                .delete(api_accounts::admin_delete_account),
        )
        .route(
            "/admin/api/accounts/:id/regenerate",
            post(api_accounts::admin_regenerate_key),
        )
        // OAuth clients
        .route("/admin/oauth/clients", get(oauth::admin_list_clients))
        .route(
            "/admin/oauth/clients/:id/revoke",
            post(oauth::admin_revoke_client),
        )
        // Invoices
        .route(
            "/admin/invoices",
            get(invoices::admin_list_invoices).post(invoices::admin_create_invoice),
        )
        .route(
            "/admin/invoices/:id",
            get(invoices::admin_get_invoice)
                .put(invoices::admin_update_invoice)
                .delete(invoices::admin_delete_invoice),
        )
        .route("/admin/invoices/:id/issue", post(invoices::admin_issue_invoice))
        .route("/admin/invoices/:id/pay", post(invoices::admin_pay_invoice))
        .route("/admin/invoices/:id/refund", post(invoices::admin_refund_invoice))
        .route("/admin/invoices/:id/revoke", post(invoices::admin_revoke_invoice))
        .route("/admin/invoices/:id/restore", post(invoices::admin_restore_invoice))
        // Contracts
        .route(
            "/admin/contracts",
            get(contracts::admin_list_contracts).post(contracts::admin_create_contract),
        )
        .route(
            "/admin/contracts/:id",
            get(contracts::admin_get_contract)
                .put(contracts::admin_update_contract)
                .delete(contracts::admin_delete_contract),
        )
        .route("/admin/contracts/:id/cancel", post(contracts::admin_cancel_contract))
        .route(
            "/admin/contracts/:id/uncancel",
            post(contracts::admin_uncancel_contract),
        )
        .route("/admin/contracts/:id/invoice", post(contracts::admin_bill_contract))
        // Tickets
        .route("/admin/tickets", get(tickets::admin_list_tickets))
        .route("/admin/tickets/:id", get(tickets::admin_get_ticket))
        .route("/admin/tickets/:id/messages", post(tickets::admin_reply))
        .route("/admin/tickets/:id/assign", post(tickets::admin_assign_ticket))
        .route("/admin/tickets/:id/close", post(tickets::admin_close_ticket))
        .route("/admin/tickets/:id/reopen", post(tickets::admin_reopen_ticket))
        .route("/admin/tickets/:id/lock", post(tickets::admin_lock_ticket))
        .route("/admin/tickets/:id/unlock", post(tickets::admin_unlock_ticket))
        .route(
            "/admin/tickets/:id/attachments/:attachment_id",
            get(tickets::admin_download_attachment),
        )
        // Pages
        .route(
            "/admin/pages",
            get(pages::admin_list_pages).post(pages::admin_create_page),
        )
        .route(
            "/admin/pages/:id",
            get(pages::admin_get_page)
                .put(pages::admin_update_page)
                .delete(pages::admin_delete_page),
        )
        // Payment gateways
        .route(
            "/admin/gateways",
            get(gateways::admin_list_gateways).post(gateways::admin_create_gateway),
        )
        .route(
            "/admin/gateways/:id",
            get(gateways::admin_get_gateway)
                .put(gateways::admin_update_gateway)
                .delete(gateways::admin_delete_gateway),
        )
        // Tenants
        .route(
            "/admin/tenants",
            get(tenants::admin_list_tenants).post(tenants::admin_create_tenant),
        )
        .route(
            "/admin/tenants/:id",
            get(tenants::admin_get_tenant).delete(tenants::admin_delete_tenant),
        )
        .route("/admin/tenants/:id/retry", post(tenants::admin_retry_tenant))
        .route("/admin/tenants/:id/suspend", post(tenants::admin_suspend_tenant))
        .route("/admin/tenants/:id/resume", post(tenants::admin_resume_tenant))
}

/// Machine API, authenticated by API key or client-credentials token
fn machine_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/invoices", get(invoices::api_list_invoices))
        .route("/api/v1/invoices/:id", get(invoices::api_get_invoice))
}

/// Attachment uploads get their own body limit instead of the default.
fn upload_routes(limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/customer/tickets/:id/messages/:message_id/attachments",
            post(tickets::customer_upload_attachment),
        )
        .route(
            "/admin/tickets/:id/messages/:message_id/attachments",
            post(tickets::admin_upload_attachment),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limit))
}
