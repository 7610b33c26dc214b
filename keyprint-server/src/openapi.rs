//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3.0 specification for the Keyprint API.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use keyprint_core::protocol::{
    AuthenticateRequest, AuthenticateResponse, ChallengeRequest, ChallengeResponse, DeviceInfo,
    RegisterRequest, RegisterResponse, RegistrationStatus, RegistrationView,
    RegistrationsResponse, SettingsRequest, SettingsResponse, StatusResponse,
};

use crate::health::{HealthResponse, ReadyResponse};

/// Keyprint API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Keyprint - Biometric Device Authentication API",
        version = "0.1.0",
        description = r#"
## Challenge-Response Biometric Authentication

Keyprint lets mobile devices authenticate with device-bound keys unlocked
by a biometric prompt:

- **Single-use challenges** - 256-bit nonces, short TTL, burned on first use
- **Post-Quantum Signatures** - ML-DSA-65 (FIPS 204) device keys
- **Revocation history** - revoked registrations stay queryable, never reusable

### How It Works

1. Register a device public key via `POST /api/v1/biometric/register`
2. Request a challenge via `POST /api/v1/biometric/challenge`
3. Sign it with the device key after a successful biometric prompt
4. Exchange the signature for session tokens via `POST /api/v1/biometric/authenticate`
"#
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Biometric", description = "Challenge issuance, device registration and challenge-response authentication"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::health::health,
        crate::health::ready,
        crate::biometric::handlers::issue_challenge,
        crate::biometric::handlers::register_device,
        crate::biometric::handlers::authenticate,
        crate::biometric::handlers::list_registrations,
        crate::biometric::handlers::get_status,
        crate::biometric::handlers::update_settings,
        crate::biometric::handlers::remove_registration,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            ChallengeRequest,
            ChallengeResponse,
            RegisterRequest,
            RegisterResponse,
            AuthenticateRequest,
            AuthenticateResponse,
            RegistrationView,
            RegistrationsResponse,
            RegistrationStatus,
            StatusResponse,
            SettingsRequest,
            SettingsResponse,
            DeviceInfo,
        )
    )
)]
pub struct ApiDoc;

/// Registers the bearer token scheme the protected endpoints reference.
struct SecurityAddon;

impl Modify for SecurityAddon {
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
