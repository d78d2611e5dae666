use std::sync::Arc;

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpResponse};
use futures_util::future::{ready, LocalBoxFuture, Ready};

use crate::connection::ConnectionManager;
use crate::dto::ErrorBody;

/// Short-circuits requests with 503 while the store connection is not up.
/// There is no queueing: callers are expected to retry once `/health` reports
/// the connection as restored.
pub struct ConnectionGate {
    manager: Arc<ConnectionManager>,
}

impl ConnectionGate {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ConnectionGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = ConnectionGateMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ConnectionGateMiddleware {
            service,
            manager: self.manager.clone(),
        }))
    }
}

pub struct ConnectionGateMiddleware<S> {
    service: S,
    manager: Arc<ConnectionManager>,
}

impl<S, B> Service<ServiceRequest> for ConnectionGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if !self.manager.is_connected() {
            let response = HttpResponse::ServiceUnavailable()
                .json(ErrorBody::service_unavailable())
                .map_into_right_body();
            return Box::pin(ready(Ok(req.into_response(response))));
        }
        let fut = self.service.call(req);
        Box::pin(async move { Ok(fut.await?.map_into_left_body()) })
    }
}
