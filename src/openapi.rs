use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Despensa API",
        version = "0.2.0",
        description = "Order intake and card-payment settlement for grocery delivery: \
                       slot availability, checkout, synchronous capture and webhook \
                       reconciliation."
    ),
    tags(
        (name = "Checkout", description = "Availability, validation, order creation and capture"),
        (name = "Orders", description = "Order lookup, audit trail and cancellation"),
        (name = "Webhooks", description = "Inbound gateway event stream")
    ),
    paths(
        crate::handlers::checkout::availability,
        crate::handlers::checkout::validate,
        crate::handlers::checkout::initiate,
        crate::handlers::checkout::capture,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_history,
        crate::handlers::orders::cancel_order,
        crate::handlers::webhooks::gateway_webhook,
    ),
    components(
        schemas(
            crate::handlers::checkout::ValidateRequest,
            crate::handlers::checkout::ValidateResponse,
            crate::handlers::checkout::InitiateRequest,
            crate::handlers::checkout::InitiateResponse,
            crate::handlers::checkout::CaptureRequest,
            crate::handlers::checkout::CaptureResponse,
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderLineResponse,
            crate::handlers::orders::OrderHistoryEntry,
            crate::handlers::orders::CancelRequest,
            crate::collaborators::AddressSnapshot,
            crate::collaborators::GuestContact,
            crate::errors::ErrorResponse,
        )
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}
