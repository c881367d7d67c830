use crate::configuration::Settings;
use crate::email_client::EmailClient;
use crate::routes::{contact_preflight, health_check, method_not_allowed, submit_contact};
use actix_web::dev::Server;
use actix_web::http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use actix_web::http::Method;
use actix_web::middleware::DefaultHeaders;
use actix_web::web::Data;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use tracing_actix_web::TracingLogger;

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    /// Validate `settings`, build the SMTP client and bind the listener.
    /// Any configuration problem is returned here, before traffic is served.
    pub async fn build(settings: Settings) -> Result<Self, anyhow::Error> {
        settings.validate()?;
        let email_client = settings.email_client.client()?;
        let recipient = OwnerRecipient(settings.email_client.recipient()?.to_string());
        let cors_origin = settings.application.cors_origin_header()?;

        let listener = TcpListener::bind(settings.application.address())?;
        let port = listener.local_addr()?.port();
        tracing::info!(
            port,
            smtp_host = %settings.email_client.smtp_host,
            smtp_port = settings.email_client.smtp_port,
            "Contact form relay listening"
        );

        let server = run(listener, email_client, recipient, cors_origin)?;
        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

/// The fixed site-owner address notifications are delivered to.
pub struct OwnerRecipient(pub String);

pub fn run(
    listener: TcpListener,
    email_client: EmailClient,
    recipient: OwnerRecipient,
    cors_origin: HeaderValue,
) -> Result<Server, std::io::Error> {
    let email_client = Data::new(email_client);
    let recipient = Data::new(recipient);
    let server = HttpServer::new(move || {
        App::new()
            // Middleware
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::resource("/contact")
                    .route(web::post().to(submit_contact))
                    .route(web::method(Method::OPTIONS).to(contact_preflight))
                    .default_service(web::to(method_not_allowed))
                    .wrap(cors_headers(cors_origin.clone())),
            )
            .app_data(email_client.clone())
            .app_data(recipient.clone())
    })
    .listen(listener)?
    .run();
    Ok(server)
}

/// Set on every `/contact` response, errors and preflights included.
fn cors_headers(origin: HeaderValue) -> DefaultHeaders {
    DefaultHeaders::new()
        .add((ACCESS_CONTROL_ALLOW_ORIGIN, origin))
        .add((ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"))
        .add((ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"))
}
