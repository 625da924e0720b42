#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    marketing_api::rocket()
}
