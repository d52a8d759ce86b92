use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;

use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{get_current_user, health_check, login, logout, refresh, register, CookieSettings};
use crate::service::AuthService;

pub fn run(
    listener: TcpListener,
    auth: AuthService,
    cookies: CookieSettings,
) -> Result<Server, std::io::Error> {
    let auth_data = web::Data::new(auth.clone());
    let cookie_data = web::Data::new(cookies);

    let server = HttpServer::new(move || {
        App::new()
            // %U is the path without the query string
            .wrap(Logger::new("%a %U %s %b %T").exclude("/health_check"))
            .wrap(LoggerMiddleware)
            .app_data(auth_data.clone())
            .app_data(cookie_data.clone())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/api/v1")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/logout", web::post().to(logout))
                    .service(
                        web::scope("/user")
                            .wrap(JwtMiddleware::new(auth.clone()))
                            .route("/me", web::get().to(get_current_user)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
