//! Calls `UserService.Login`, then `UserService.Register`.
//!
//! The demo provider publishes only `Login`, so the second call shows the
//! "service not found" path through the controller.

mod messages;

use std::sync::Arc;

use beacon_rpc::{
    bootstrap, registry, ChannelConfig, Registry, RpcChannel, RpcController, ServiceStub,
};
use messages::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app = bootstrap::init()?;
    let config = app.config();

    let registry = registry::connect(config).await?;
    let channel = Arc::new(RpcChannel::with_config(registry.clone(), ChannelConfig::from(config)));
    let stub = ServiceStub::new(channel, "UserService");

    let mut controller = RpcController::new();
    let request = LoginRequest {
        name: "zhangsan".to_string(),
        pwd: "123456".to_string(),
    };
    let response: LoginResponse = stub.call("Login", &request, &mut controller).await;

    if controller.failed() {
        println!("rpc call failed! error: {}", controller.error_text());
    } else if response.result.is_ok() {
        println!("rpc call success!");
        println!("login result: {}", response.success);
    } else {
        println!("rpc call failed! error: {}", response.result.errmsg);
    }

    controller.reset();
    let request = RegisterRequest {
        id: 10001,
        name: "zhangsan".to_string(),
        pwd: "123456".to_string(),
    };
    let response: RegisterResponse = stub.call("Register", &request, &mut controller).await;

    if controller.failed() {
        println!("rpc call failed! error: {}", controller.error_text());
    } else if response.result.is_ok() {
        println!("rpc call success!");
        println!("register result: {}", response.success);
    } else {
        println!("rpc call failed! error: {}", response.result.errmsg);
    }

    registry.close().await;
    app.shutdown();
    Ok(())
}
