// request_log.rs
use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use slog::{info, Logger};
use std::future::{ready, Ready};
use std::rc::Rc;

/// Logs one line per request with method, path, status and duration.
/// Header contents are never logged; the Authorization header in
/// particular stays out of the log stream.
pub struct RequestLogger {
    pub logger: Logger,
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLoggerService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerService {
            service: Rc::new(service),
            logger: self.logger.clone(),
        }))
    }
}

pub struct RequestLoggerService<S> {
    service: Rc<S>,
    logger: Logger,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let logger = self.logger.clone();
        let method = req.method().clone();
        let path = req.path().to_string();
        let peer_addr = req.peer_addr().map(|addr| addr.to_string());

        let fut = self.service.call(req);

        Box::pin(async move {
            let start_time = std::time::Instant::now();
            let res = fut.await?;
            let duration = start_time.elapsed().as_millis() as u64;

            info!(
                logger,
                "{} {} -> {} ({}ms) peer={}",
                method.as_str(),
                path,
                res.status().as_u16(),
                duration,
                peer_addr.unwrap_or_else(|| "unknown".to_string())
            );
            Ok(res)
        })
    }
}
