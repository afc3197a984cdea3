//! UserService provider - publishes `UserService.Login`.
//!
//! This example demonstrates:
//! - Loading the configuration with `-i <file>`
//! - Registering a typed method handler
//! - Publishing it through the configured registry
//!
//! # Running
//!
//! ```text
//! cargo run --bin beacon-registry -- --port 2181
//! cargo run --example user_service -- -i demos/test.conf
//! cargo run --example call_user_service -- -i demos/test.conf
//! ```

mod messages;

use beacon_rpc::{bootstrap, registry, MethodError, ResultCode, RpcProvider, ServiceDescriptor};
use messages::{LoginRequest, LoginResponse};
use tracing::info;

async fn login(request: LoginRequest) -> Result<LoginResponse, MethodError> {
    info!("doing local service: Login (name: {})", request.name);
    if request.name.is_empty() {
        return Err(MethodError::new(10, "user name must not be empty"));
    }

    Ok(LoginResponse {
        result: ResultCode::ok(),
        success: request.pwd == "123456",
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app = bootstrap::init()?;
    let config = app.config();

    let registry = registry::connect(config).await?;
    let user_service = ServiceDescriptor::new("UserService").method("Login", login);

    let provider = RpcProvider::builder()
        .config(config)
        .service(user_service)
        .registry(registry)
        .start(&config.rpc_endpoint().to_string())
        .await?;

    // Serve until Ctrl-C
    provider.wait_for_shutdown().await?;

    app.shutdown();
    Ok(())
}
