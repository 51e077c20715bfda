//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{health, loans};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "SmartLibrary Loans API",
        version = "1.0.0",
        description = "Loan desk of the SmartLibrary digital library",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Loans
        loans::create_loan,
        loans::list_loans,
        loans::list_loans_with_details,
        loans::list_overdue,
        loans::get_stats,
        loans::my_loans,
        loans::my_stats,
        loans::get_loan,
        loans::return_loan,
        loans::extend_loan,
        loans::assess_fine,
        loans::pay_fine,
        loans::get_user_loans,
    ),
    components(
        schemas(
            // Loans
            crate::models::LoanRecord,
            crate::models::LoanDetails,
            crate::models::LoanStats,
            crate::models::Pagination,
            crate::models::CreateLoanRequest,
            crate::models::loan::ExtendLoanRequest,
            crate::models::loan::LoanSortBy,
            crate::models::loan::SortOrder,
            crate::models::BookSummary,
            crate::models::UserSummary,
            crate::models::HandlerSummary,
            crate::models::LoanId,
            crate::models::UserRef,
            crate::models::BookRef,
            loans::LoanListResponse,
            loans::LoanDetailsListResponse,
            loans::ReturnResponse,
            loans::ExtendResponse,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "loans", description = "Loan management")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
